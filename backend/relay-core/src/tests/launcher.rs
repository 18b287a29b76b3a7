// Unit tests for UI launching

use crate::pairing::{UiSurface, pairing_url};

use url::Url;

fn assert_send_sync<T: ?Sized + Send + Sync>() {}

/// **VALUE**: An open surface can live inside the session actor.
///
/// **BUG THIS CATCHES**: The session keeps its surface while awaiting config reads; a
/// surface that is not `Sync` makes the actor future non-`Send` and it can no longer be
/// spawned on the runtime.
#[test]
fn given_ui_surface_when_held_across_awaits_then_send_and_sync() {
    assert_send_sync::<dyn UiSurface>();
    assert_send_sync::<Box<dyn UiSurface>>();
    assert_send_sync::<Option<Box<dyn UiSurface>>>();
}

#[test]
fn given_ui_url_when_building_pairing_url_then_client_id_in_fragment() {
    // GIVEN: A UI address with a stray path and query
    let ui = Url::parse("http://127.0.0.1:8180/old/path?x=1").expect("url");

    // WHEN: Building the pairing URL
    let url = pairing_url(&ui, "client-1").expect("valid client id");

    // THEN: Root path, no query, client id in the fragment
    assert_eq!(url.as_str(), "http://127.0.0.1:8180/#/?from=client-1");
}

#[test]
fn given_blank_client_id_when_building_pairing_url_then_rejected() {
    let ui = Url::parse("http://127.0.0.1:8180").expect("url");

    assert!(pairing_url(&ui, "  ").is_err());
}
