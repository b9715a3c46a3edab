//! Documents relayed through a loopback hub.

use std::time::Duration;

use collabmap::{
    CollabDocument,
    config::{BackendKind, CollabConfig, Replication},
    crdt::{CrdtMap, Value},
    ordered::JsonMapper,
    sync::LoopbackHub,
};
use serde_json::json;

use crate::helpers::*;

fn shared_doc(hub: &LoopbackHub, client_id: u64) -> CollabDocument {
    let config = CollabConfig::default()
        .with_replication(Replication::Yrs)
        .with_backend(BackendKind::Loopback)
        .with_hub(hub.clone())
        .with_client_id(client_id);
    CollabDocument::new(config).expect("document")
}

#[tokio::test]
async fn test_edits_reach_connected_peer() {
    let hub = LoopbackHub::new();
    let doc_a = shared_doc(&hub, 1);
    let doc_b = shared_doc(&hub, 2);
    doc_a.connect_to("loopback://notes", None).await.unwrap();
    doc_b.connect_to("loopback://notes", None).await.unwrap();
    assert_eq!(hub.members("notes"), 2);

    doc_a
        .object("page")
        .set(&json!({"title": "Hello", "body": {"text": "world"}}))
        .unwrap();

    let page_b = doc_b.object("page");
    wait_until("page to reach peer", || {
        page_b.get_clone() == json!({"title": "Hello", "body": {"text": "world"}})
    })
    .await;

    page_b.get().set("title", "Hi").unwrap();
    let page_a = doc_a.object("page");
    wait_until("edit to come back", || {
        page_a.get_clone()["title"] == json!("Hi")
    })
    .await;
}

#[tokio::test]
async fn test_joining_exchanges_existing_state() {
    let hub = LoopbackHub::new();
    let doc_a = shared_doc(&hub, 1);
    let doc_b = shared_doc(&hub, 2);

    doc_a.map("settings").set("from_a", Value::from(1)).unwrap();
    doc_b.map("settings").set("from_b", Value::from(2)).unwrap();

    doc_a.connect_to("loopback://room", None).await.unwrap();
    doc_b.connect_to("loopback://room", None).await.unwrap();

    let settings_a = doc_a.map("settings");
    let settings_b = doc_b.map("settings");
    wait_until("both sides to hold both keys", || {
        settings_a.len() == 2 && settings_b.len() == 2
    })
    .await;
}

#[tokio::test]
async fn test_ordered_collection_over_loopback() {
    let hub = LoopbackHub::new();
    let doc_a = shared_doc(&hub, 1);
    let doc_b = shared_doc(&hub, 2);
    doc_a.connect_to("loopback://list", None).await.unwrap();
    doc_b.connect_to("loopback://list", None).await.unwrap();

    let list_a = doc_a.ordered("tasks", JsonMapper::<String>::new());
    let list_b = doc_b.ordered("tasks", JsonMapper::<String>::new());
    list_a.add("t1", "write".to_string()).unwrap();
    list_a.add("t2", "review".to_string()).unwrap();
    list_a.insert("t0", "plan".to_string(), 0).unwrap();

    wait_until("ordered entries to converge", || {
        list_b.keys() == vec!["t0", "t1", "t2"]
    })
    .await;
    assert_eq!(list_b.get("t0"), Some("plan".to_string()));
}

#[tokio::test]
async fn test_presence_is_relayed_and_withdrawn() {
    let hub = LoopbackHub::new();
    let doc_a = shared_doc(&hub, 1);
    let doc_b = shared_doc(&hub, 2);
    doc_a
        .connect_to("loopback://presence", Some(json!({"name": "a"})))
        .await
        .unwrap();
    doc_b
        .connect_to("loopback://presence", Some(json!({"name": "b"})))
        .await
        .unwrap();

    let awareness_a = doc_a.awareness().await.unwrap();
    let awareness_b = doc_b.awareness().await.unwrap();
    wait_until("presence to be exchanged", || {
        awareness_a.states().len() == 2 && awareness_b.states().len() == 2
    })
    .await;
    assert_eq!(awareness_a.states()[&2], json!({"name": "b"}));
    assert_eq!(awareness_b.states()[&1], json!({"name": "a"}));

    awareness_b.set_local_state(Some(json!({"name": "b", "cursor": 4})));
    wait_until("presence update", || {
        awareness_a.states()[&2]["cursor"] == json!(4)
    })
    .await;

    doc_b.disconnect_now().await.unwrap();
    wait_until("peer to leave", || awareness_a.states().len() == 1).await;
}

#[tokio::test]
async fn test_disconnected_peer_stops_receiving() {
    let hub = LoopbackHub::new();
    let doc_a = shared_doc(&hub, 1);
    let doc_b = shared_doc(&hub, 2);
    doc_a.connect_to("loopback://quiet", None).await.unwrap();
    doc_b.connect_to("loopback://quiet", None).await.unwrap();

    doc_b.disconnect_now().await.unwrap();
    assert!(!doc_b.is_connected().await);
    assert_eq!(hub.members("quiet"), 1);

    doc_a.map("m").set("after", Value::from(true)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!doc_b.map("m").has("after"));
}

#[tokio::test]
async fn test_lagging_receiver_resyncs() {
    let hub = LoopbackHub::with_capacity(2);
    let doc_a = shared_doc(&hub, 1);
    let doc_b = shared_doc(&hub, 2);
    doc_a.connect_to("loopback://burst", None).await.unwrap();
    doc_b.connect_to("loopback://burst", None).await.unwrap();

    let map_a = doc_a.map("burst");
    for i in 0..50 {
        map_a.set(&format!("k{i}"), Value::from(i)).unwrap();
    }

    let map_b = doc_b.map("burst");
    wait_until("lagging peer to catch up", || map_b.len() == 50).await;
}

#[tokio::test]
async fn test_bursts_from_several_peers_converge() {
    let hub = LoopbackHub::with_capacity(2);
    let docs: Vec<CollabDocument> = (1..=3).map(|id| shared_doc(&hub, id)).collect();
    for doc in &docs {
        doc.connect_to("loopback://crowd", Some(json!("here")))
            .await
            .unwrap();
    }

    for (n, doc) in docs.iter().enumerate() {
        let map = doc.map("crowd");
        for i in 0..30 {
            map.set(&format!("d{n}k{i}"), Value::from(i)).unwrap();
        }
    }

    let maps: Vec<_> = docs.iter().map(|doc| doc.map("crowd")).collect();
    wait_until("every peer to hold every key", || {
        maps.iter().all(|map| map.len() == 90)
    })
    .await;

    let awareness = docs[0].awareness().await.unwrap();
    wait_until("presence of every peer", || awareness.states().len() == 3).await;
    docs[2].map("crowd").set("late", Value::from(true)).unwrap();
    wait_until("a later edit to arrive", || maps[0].has("late")).await;
}

#[tokio::test]
async fn test_invalid_url_reports_error() {
    let hub = LoopbackHub::new();
    let doc = shared_doc(&hub, 1);
    let err = doc.connect_to("http://example.com", None).await.unwrap_err();
    assert!(err.is_sync_error());
    assert!(!doc.is_connected().await);
    assert!(hub.rooms().is_empty());

    // a failed attempt does not prevent a later connect
    doc.connect_to("loopback://ok", None).await.unwrap();
    assert!(doc.is_connected().await);
}

#[tokio::test]
async fn test_silent_peer_presence_expires() {
    let hub = LoopbackHub::new();
    let quick = |client_id: u64| {
        let mut config = CollabConfig::default()
            .with_replication(Replication::Yrs)
            .with_backend(BackendKind::Loopback)
            .with_hub(hub.clone())
            .with_client_id(client_id);
        config.presence_timeout_ms = 100;
        CollabDocument::new(config).expect("document")
    };
    let doc_a = quick(1);
    let doc_b = quick(2);
    doc_a
        .connect_to("loopback://heartbeat", Some(json!("a")))
        .await
        .unwrap();
    doc_b
        .connect_to("loopback://heartbeat", Some(json!("b")))
        .await
        .unwrap();

    let awareness_a = doc_a.awareness().await.unwrap();
    wait_until("peer presence", || awareness_a.states().len() == 2).await;

    // heartbeats keep a live peer around for several timeouts
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(awareness_a.states().len(), 2);

    // dropping the document stops its heartbeat without a withdrawal
    drop(doc_b);
    wait_until("silent peer to expire", || awareness_a.states().len() == 1).await;
}
