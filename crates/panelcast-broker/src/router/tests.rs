use serde_json::json;

use super::*;

fn connect(router: &mut Router<()>) -> PeerId {
    router.connect(()).unwrap().0
}

fn register(router: &mut Router<()>, id: PeerId, role: Role, panels: &[&str]) -> Vec<Delivery> {
    router.route(
        id,
        ClientMessage::Register {
            role,
            panel_ids: panels.iter().map(|s| s.to_string()).collect(),
        },
    )
}

fn recipients(deliveries: &[Delivery]) -> Vec<PeerId> {
    deliveries.iter().map(|d| d.to).collect()
}

#[test]
fn welcome_lists_registered_peers_and_null_snapshot() {
    let mut router = Router::new();
    let cap = connect(&mut router);
    register(&mut router, cap, Role::Capture, &["panel-main"]);
    let _lurker = connect(&mut router);

    let (id, welcome) = router.connect(()).unwrap();
    assert_eq!(welcome.to, id);
    match welcome.message {
        ServerMessage::Welcome {
            peer_id,
            peers,
            catalogue_snapshot,
        } => {
            assert_eq!(peer_id, id);
            assert_eq!(peers.len(), 1);
            assert_eq!(peers[0].peer_id, cap);
            assert_eq!(peers[0].panel_ids, vec!["panel-main".to_string()]);
            assert!(catalogue_snapshot.is_none());
        }
        other => panic!("expected welcome, got {other:?}"),
    }
    assert_eq!(router.stats().connected_total, 3);
}

#[test]
fn welcome_carries_most_recent_catalogue() {
    let mut router = Router::new();
    let a = connect(&mut router);
    let b = connect(&mut router);
    register(&mut router, a, Role::Capture, &[]);
    register(&mut router, b, Role::Capture, &[]);
    router.route(a, ClientMessage::WindowList { windows: vec![json!({"sourceId": "a"})] });
    router.route(b, ClientMessage::WindowList { windows: vec![json!({"sourceId": "b"})] });

    let (_, welcome) = router.connect(()).unwrap();
    let ServerMessage::Welcome { catalogue_snapshot, .. } = welcome.message else {
        panic!("expected welcome");
    };
    let snapshot = catalogue_snapshot.unwrap();
    assert_eq!(snapshot.from_id, b);
    assert_eq!(snapshot.windows, vec![json!({"sourceId": "b"})]);

    // Once the latest publisher leaves, the previous one is served.
    router.disconnect(b);
    let (_, welcome) = router.connect(()).unwrap();
    let ServerMessage::Welcome { catalogue_snapshot, .. } = welcome.message else {
        panic!("expected welcome");
    };
    assert_eq!(catalogue_snapshot.unwrap().from_id, a);
}

#[test]
fn register_broadcasts_to_all_other_peers() {
    let mut router = Router::new();
    let viewer = connect(&mut router);
    let unregistered = connect(&mut router);
    let cap = connect(&mut router);
    register(&mut router, viewer, Role::Viewer, &[]);

    let out = register(&mut router, cap, Role::Capture, &["p1", "p2"]);
    assert_eq!(recipients(&out), vec![viewer, unregistered]);
    assert_eq!(
        out[0].message,
        ServerMessage::PeerRegistered {
            peer_id: cap,
            role: Role::Capture,
            panel_ids: vec!["p1".into(), "p2".into()],
        }
    );
}

#[test]
fn identical_register_is_a_no_op() {
    let mut router = Router::new();
    let viewer = connect(&mut router);
    let cap = connect(&mut router);
    register(&mut router, viewer, Role::Viewer, &[]);
    register(&mut router, cap, Role::Capture, &["p1"]);
    let before = router.stats().broadcasts;

    assert!(register(&mut router, cap, Role::Capture, &["p1"]).is_empty());
    assert_eq!(router.stats().broadcasts, before);

    let out = register(&mut router, cap, Role::Capture, &["p1", "p2"]);
    assert_eq!(recipients(&out), vec![viewer]);
}

#[test]
fn role_change_is_last_write_wins() {
    let mut router = Router::new();
    let other = connect(&mut router);
    let flip = connect(&mut router);
    register(&mut router, other, Role::Viewer, &[]);
    register(&mut router, flip, Role::Capture, &["p"]);
    router.route(flip, ClientMessage::WindowList { windows: vec![json!({})] });

    let out = register(&mut router, flip, Role::Viewer, &[]);
    assert_eq!(out.len(), 1);
    assert!(matches!(
        out[0].message,
        ServerMessage::PeerRegistered { role: Role::Viewer, .. }
    ));
    assert!(router.registry().list_by_role(Role::Capture).is_empty());

    // A peer that stopped being a capture peer no longer seeds welcomes.
    let (_, welcome) = router.connect(()).unwrap();
    assert!(matches!(
        welcome.message,
        ServerMessage::Welcome { catalogue_snapshot: None, .. }
    ));
}

#[test]
fn directed_messages_swap_target_for_sender() {
    let mut router = Router::new();
    let cap = connect(&mut router);
    let viewer = connect(&mut router);
    register(&mut router, cap, Role::Capture, &["panel-main"]);
    register(&mut router, viewer, Role::Viewer, &[]);

    let out = router.route(
        cap,
        ClientMessage::Offer {
            target_id: viewer,
            panel_id: "panel-main".into(),
            sdp: json!({"type": "offer", "sdp": "v=0"}),
            negotiation_id: Some(1),
        },
    );
    assert_eq!(
        out,
        vec![Delivery {
            to: viewer,
            message: ServerMessage::Offer {
                from_id: cap,
                panel_id: "panel-main".into(),
                sdp: json!({"type": "offer", "sdp": "v=0"}),
                negotiation_id: Some(1),
            },
        }]
    );
    assert_eq!(router.stats().routed, 1);
}

#[test]
fn directed_message_to_absent_target_is_dropped_and_counted() {
    let mut router = Router::new();
    let viewer = connect(&mut router);
    register(&mut router, viewer, Role::Viewer, &[]);

    let kinds = vec![
        ClientMessage::IceCandidate {
            target_id: PeerId(404),
            panel_id: "p".into(),
            candidate: json!({"candidate": "x"}),
            negotiation_id: None,
        },
        ClientMessage::CaptureWindow {
            target_id: PeerId(404),
            source_id: "screen:0".into(),
            panel_id: "p".into(),
            orientation: None,
        },
        ClientMessage::ReleasePanel {
            target_id: PeerId(404),
            panel_id: "p".into(),
        },
    ];
    for msg in kinds {
        assert!(router.route(viewer, msg).is_empty());
    }
    assert_eq!(router.stats().dropped_unknown_target, 3);
    assert_eq!(router.stats().routed, 0);
}

#[test]
fn directed_message_reaches_unregistered_target() {
    let mut router = Router::new();
    let sender = connect(&mut router);
    let target = connect(&mut router);
    let out = router.route(
        sender,
        ClientMessage::ReleasePanel {
            target_id: target,
            panel_id: "p".into(),
        },
    );
    assert_eq!(recipients(&out), vec![target]);
}

#[test]
fn panel_request_with_no_capture_peers_produces_nothing() {
    let mut router = Router::new();
    let viewer = connect(&mut router);
    register(&mut router, viewer, Role::Viewer, &[]);

    let out = router.route(
        viewer,
        ClientMessage::PanelRequest {
            panel_id: "panel-X".into(),
        },
    );
    assert!(out.is_empty());
    assert_eq!(router.stats().broadcasts, 0);
}

#[test]
fn panel_request_reaches_every_capture_peer() {
    let mut router = Router::new();
    let c1 = connect(&mut router);
    let viewer = connect(&mut router);
    let c2 = connect(&mut router);
    register(&mut router, c1, Role::Capture, &["a"]);
    register(&mut router, c2, Role::Capture, &["b"]);
    register(&mut router, viewer, Role::Viewer, &[]);

    let out = router.route(
        viewer,
        ClientMessage::PanelRequest {
            panel_id: "a".into(),
        },
    );
    assert_eq!(recipients(&out), vec![c1, c2]);
    assert!(out.iter().all(|d| d.message
        == ServerMessage::PanelRequest {
            from_id: viewer,
            panel_id: "a".into()
        }));
}

#[test]
fn window_list_forwards_to_viewers_only() {
    let mut router = Router::new();
    let cap = connect(&mut router);
    let v1 = connect(&mut router);
    let other_cap = connect(&mut router);
    let v2 = connect(&mut router);
    register(&mut router, cap, Role::Capture, &[]);
    register(&mut router, other_cap, Role::Capture, &[]);
    register(&mut router, v1, Role::Viewer, &[]);
    register(&mut router, v2, Role::Viewer, &[]);

    let windows = vec![json!({"sourceId": "screen:0", "name": "Primary"})];
    let out = router.route(cap, ClientMessage::WindowList { windows: windows.clone() });
    assert_eq!(recipients(&out), vec![v1, v2]);
    assert_eq!(
        out[0].message,
        ServerMessage::WindowList {
            from_id: cap,
            windows
        }
    );
}

#[test]
fn window_list_from_viewer_is_rejected() {
    let mut router = Router::new();
    let viewer = connect(&mut router);
    let other = connect(&mut router);
    register(&mut router, viewer, Role::Viewer, &[]);
    register(&mut router, other, Role::Viewer, &[]);

    assert!(router
        .route(viewer, ClientMessage::WindowList { windows: vec![json!({})] })
        .is_empty());
    assert_eq!(router.stats().rejected, 1);
}

#[test]
fn catalogue_request_goes_to_capture_peers() {
    let mut router = Router::new();
    let cap = connect(&mut router);
    let viewer = connect(&mut router);
    register(&mut router, cap, Role::Capture, &[]);
    register(&mut router, viewer, Role::Viewer, &[]);

    let out = router.inbound(viewer, r#"{"type":"catalogue-request"}"#);
    assert_eq!(
        out,
        vec![Delivery {
            to: cap,
            message: ServerMessage::RequestWindowList { from_id: viewer },
        }]
    );
}

#[test]
fn malformed_frames_are_counted_and_ignored() {
    let mut router = Router::new();
    let peer = connect(&mut router);

    assert!(router.inbound(peer, "not json").is_empty());
    assert!(router.inbound(peer, r#"{"type":"bogus"}"#).is_empty());
    assert!(router.inbound(peer, r#"{"type":"offer","panelId":"p"}"#).is_empty());
    assert_eq!(router.stats().malformed, 3);
    assert!(router.registry().find(peer).is_some());
}

#[test]
fn disconnect_notifies_all_remaining_peers() {
    let mut router = Router::new();
    let cap = connect(&mut router);
    let viewer = connect(&mut router);
    let unregistered = connect(&mut router);
    register(&mut router, cap, Role::Capture, &["p"]);
    register(&mut router, viewer, Role::Viewer, &[]);

    let out = router.disconnect(viewer);
    assert_eq!(recipients(&out), vec![cap, unregistered]);
    assert!(out
        .iter()
        .all(|d| d.message == ServerMessage::PeerDisconnected { peer_id: viewer }));
    assert!(router.registry().find(viewer).is_none());

    // A second disconnect for the same peer is a no-op.
    assert!(router.disconnect(viewer).is_empty());
}

#[test]
fn messages_after_disconnect_are_ignored() {
    let mut router = Router::new();
    let a = connect(&mut router);
    let b = connect(&mut router);
    router.disconnect(a);
    assert!(router
        .route(a, ClientMessage::ReleasePanel { target_id: b, panel_id: "p".into() })
        .is_empty());
}
