mod accounts;
mod config;
mod launcher;
mod node;
mod pairing;
mod panel;
mod proto;
mod retry;
mod subscription;
