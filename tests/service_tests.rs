//! Command services: wire bodies, local checks, and session state.

mod common;

use common::{test_config, CoreHandle, FakeFactory, FakeTransport};
use roon_client::{
    BrowseService, LoadOpts, LoopSetting, MemoryTokenStore, MooMessage, RoonConnection, RoonError,
    TokenStore, TransportService,
};
use serde_json::{json, Value};
use std::sync::Arc;

async fn connected() -> (RoonConnection, CoreHandle) {
    let (transport, core) = FakeTransport::pair();
    let factory = FakeFactory::new();
    factory.push(transport);
    let tokens: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
    let connection = RoonConnection::new(test_config(), factory, tokens);

    let core_task = tokio::spawn(async move {
        let mut core = core;
        core.serve_registration("c1", "Studio", "t1").await;
        core
    });
    connection.connect().await.expect("connect failed");
    let core = core_task.await.unwrap();
    (connection, core)
}

/// Receive one transport-service request, reply `Success`, and hand the
/// request back for body assertions.
async fn answer(core: &mut CoreHandle, method: &str, body: Option<Value>) -> MooMessage {
    let msg = core.recv_message().await;
    assert_eq!(msg.name, format!("com.roonlabs.transport:2/{method}"));
    core.send_complete(msg.request_id, "Success", body);
    msg
}

#[tokio::test]
async fn control_commands_carry_the_selected_zone() {
    let (connection, mut core) = connected().await;
    let service = TransportService::new(connection);
    service.select_zone("z1");

    let checks = [
        ("play", "play"),
        ("pause", "pause"),
        ("playpause", "playpause"),
        ("stop", "stop"),
        ("next", "next"),
        ("previous", "previous"),
    ];
    for (control, expected) in checks {
        let svc = service.clone();
        let call = tokio::spawn(async move {
            match control {
                "play" => svc.play().await,
                "pause" => svc.pause().await,
                "playpause" => svc.play_pause().await,
                "stop" => svc.stop().await,
                "next" => svc.next().await,
                _ => svc.previous().await,
            }
        });
        let msg = answer(&mut core, "control", None).await;
        assert_eq!(
            msg.body_json().unwrap(),
            &json!({"zone_or_output_id": "z1", "control": expected})
        );
        call.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn zone_commands_without_a_selection_fail_locally() {
    let (connection, _core) = connected().await;
    let service = TransportService::new(connection);

    assert!(matches!(service.play().await, Err(RoonError::NoZoneSelected)));
    assert!(matches!(
        service.seek_absolute(10.0).await,
        Err(RoonError::NoZoneSelected)
    ));
    assert!(matches!(
        service.set_shuffle(true).await,
        Err(RoonError::NoZoneSelected)
    ));
    assert!(matches!(
        service.play_from_here(3).await,
        Err(RoonError::NoZoneSelected)
    ));
}

#[tokio::test]
async fn volume_and_mute_bodies() {
    let (connection, mut core) = connected().await;
    let service = TransportService::new(connection);

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.set_volume("o1", 42.0).await });
    let msg = answer(&mut core, "change_volume", None).await;
    assert_eq!(
        msg.body_json().unwrap(),
        &json!({"output_id": "o1", "how": "absolute", "value": 42.0})
    );
    call.await.unwrap().unwrap();

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.adjust_volume("o1", -5.0).await });
    let msg = answer(&mut core, "change_volume", None).await;
    assert_eq!(msg.body_json().unwrap()["how"], "relative");
    call.await.unwrap().unwrap();

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.step_volume("o1", 1.0).await });
    let msg = answer(&mut core, "change_volume", None).await;
    assert_eq!(msg.body_json().unwrap()["how"], "relative_step");
    call.await.unwrap().unwrap();

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.mute("o1").await });
    let msg = answer(&mut core, "mute", None).await;
    assert_eq!(
        msg.body_json().unwrap(),
        &json!({"output_id": "o1", "how": "mute"})
    );
    call.await.unwrap().unwrap();

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.unmute_all().await });
    let msg = answer(&mut core, "mute_all", None).await;
    assert_eq!(msg.body_json().unwrap(), &json!({"how": "unmute"}));
    call.await.unwrap().unwrap();

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.pause_all().await });
    answer(&mut core, "pause_all", None).await;
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn seek_and_settings_bodies() {
    let (connection, mut core) = connected().await;
    let service = TransportService::new(connection);
    service.select_zone("z1");

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.seek_relative(-10.0).await });
    let msg = answer(&mut core, "seek", None).await;
    assert_eq!(
        msg.body_json().unwrap(),
        &json!({"zone_or_output_id": "z1", "how": "relative", "seconds": -10.0})
    );
    call.await.unwrap().unwrap();

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.set_loop(LoopSetting::LoopOne).await });
    let msg = answer(&mut core, "change_settings", None).await;
    assert_eq!(
        msg.body_json().unwrap(),
        &json!({"zone_or_output_id": "z1", "loop": "loop_one"})
    );
    call.await.unwrap().unwrap();

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.cycle_loop().await });
    let msg = answer(&mut core, "change_settings", None).await;
    assert_eq!(msg.body_json().unwrap()["loop"], "next");
    call.await.unwrap().unwrap();

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.set_shuffle(true).await });
    let msg = answer(&mut core, "change_settings", None).await;
    assert_eq!(msg.body_json().unwrap()["shuffle"], true);
    call.await.unwrap().unwrap();

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.set_auto_radio(false).await });
    let msg = answer(&mut core, "change_settings", None).await;
    assert_eq!(msg.body_json().unwrap()["auto_radio"], false);
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn grouping_standby_and_transfer_bodies() {
    let (connection, mut core) = connected().await;
    let service = TransportService::new(connection);
    service.select_zone("z1");

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.standby("o1", Some("1")).await });
    let msg = answer(&mut core, "standby", None).await;
    assert_eq!(
        msg.body_json().unwrap(),
        &json!({"output_id": "o1", "control_key": "1"})
    );
    call.await.unwrap().unwrap();

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.convenience_switch("o1", None).await });
    let msg = answer(&mut core, "convenience_switch", None).await;
    assert_eq!(msg.body_json().unwrap(), &json!({"output_id": "o1"}));
    call.await.unwrap().unwrap();

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.transfer_zone("z1", "z2").await });
    let msg = answer(&mut core, "transfer_zone", None).await;
    assert_eq!(
        msg.body_json().unwrap(),
        &json!({"from_zone_or_output_id": "z1", "to_zone_or_output_id": "z2"})
    );
    call.await.unwrap().unwrap();

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.group_outputs(&["o1", "o2"]).await });
    let msg = answer(&mut core, "group_outputs", None).await;
    assert_eq!(msg.body_json().unwrap(), &json!({"output_ids": ["o1", "o2"]}));
    call.await.unwrap().unwrap();

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.play_from_here(42).await });
    let msg = answer(&mut core, "play_from_here", None).await;
    assert_eq!(
        msg.body_json().unwrap(),
        &json!({"zone_or_output_id": "z1", "queue_item_id": 42})
    );
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn get_zones_parses_the_reply() {
    let (connection, mut core) = connected().await;
    let service = TransportService::new(connection);

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.get_zones().await });
    answer(
        &mut core,
        "get_zones",
        Some(json!({"zones": [
            {"zone_id": "z1", "display_name": "Kitchen", "state": "paused"},
            {"zone_id": "z2", "display_name": "Office"},
        ]})),
    )
    .await;

    let zones = call.await.unwrap().unwrap();
    assert_eq!(zones.len(), 2);
    assert_eq!(zones[0].display_name, "Kitchen");
}

#[tokio::test]
async fn remote_rejection_maps_to_command_failed() {
    let (connection, mut core) = connected().await;
    let service = TransportService::new(connection);
    service.select_zone("z1");

    let svc = service.clone();
    let call = tokio::spawn(async move { svc.play().await });
    let msg = core.recv_message().await;
    core.send_complete(
        msg.request_id,
        "InvalidRequest",
        Some(json!({"error": "zone is not playable"})),
    );

    let result = call.await.unwrap();
    assert!(
        matches!(result, Err(RoonError::CommandFailed(message)) if message == "zone is not playable")
    );
}

// ---- browse -----------------------------------------------------------

async fn answer_browse(core: &mut CoreHandle, method: &str, body: Value) -> MooMessage {
    let msg = core.recv_message().await;
    assert_eq!(msg.name, format!("com.roonlabs.browse:1/{method}"));
    core.send_complete(msg.request_id, "Success", Some(body));
    msg
}

#[tokio::test]
async fn browse_session_caches_hierarchy_and_level() {
    let (connection, mut core) = connected().await;
    let browse = BrowseService::new(connection);

    // Entering a hierarchy pops to its root.
    let svc = browse.clone();
    let call = tokio::spawn(async move { svc.browse_home("albums").await });
    let msg = answer_browse(
        &mut core,
        "browse",
        json!({"action": "list", "list": {"title": "Albums", "count": 120, "level": 0}}),
    )
    .await;
    assert_eq!(
        msg.body_json().unwrap(),
        &json!({"hierarchy": "albums", "pop_all": true})
    );
    let result = call.await.unwrap().unwrap();
    assert_eq!(result.action, "list");
    assert_eq!(browse.current_hierarchy().as_deref(), Some("albums"));
    assert_eq!(browse.current_level(), Some(0));

    // Descending reuses the cached hierarchy.
    let svc = browse.clone();
    let call = tokio::spawn(async move { svc.select_item("k1").await });
    let msg = answer_browse(
        &mut core,
        "browse",
        json!({"action": "list", "list": {"title": "Album", "count": 12, "level": 1}}),
    )
    .await;
    assert_eq!(
        msg.body_json().unwrap(),
        &json!({"hierarchy": "albums", "item_key": "k1"})
    );
    call.await.unwrap().unwrap();
    assert_eq!(browse.current_level(), Some(1));
    assert_eq!(browse.current_list().unwrap().count, 12);

    // Loading pages the current level by default.
    let svc = browse.clone();
    let call = tokio::spawn(async move {
        svc.load(LoadOpts {
            offset: 10,
            ..LoadOpts::default()
        })
        .await
    });
    let msg = answer_browse(
        &mut core,
        "load",
        json!({"items": [{"title": "Track 11"}], "offset": 10}),
    )
    .await;
    assert_eq!(
        msg.body_json().unwrap(),
        &json!({"hierarchy": "albums", "offset": 10, "count": 100, "level": 1})
    );
    let loaded = call.await.unwrap().unwrap();
    assert_eq!(loaded.items[0].title, "Track 11");
    assert_eq!(loaded.offset, 10);
}

#[tokio::test]
async fn browse_back_refresh_and_offset_bodies() {
    let (connection, mut core) = connected().await;
    let browse = BrowseService::new(connection);

    let svc = browse.clone();
    let call = tokio::spawn(async move { svc.browse_home("artists").await });
    answer_browse(
        &mut core,
        "browse",
        json!({"action": "list", "list": {"title": "Artists", "count": 3, "level": 0}}),
    )
    .await;
    call.await.unwrap().unwrap();

    let svc = browse.clone();
    let call = tokio::spawn(async move { svc.back().await });
    let msg = answer_browse(&mut core, "browse", json!({"action": "list"})).await;
    assert_eq!(
        msg.body_json().unwrap(),
        &json!({"hierarchy": "artists", "pop_levels": 1})
    );
    call.await.unwrap().unwrap();

    let svc = browse.clone();
    let call = tokio::spawn(async move { svc.refresh().await });
    let msg = answer_browse(&mut core, "browse", json!({"action": "list"})).await;
    assert_eq!(msg.body_json().unwrap()["refresh_list"], true);
    call.await.unwrap().unwrap();

    let svc = browse.clone();
    let call = tokio::spawn(async move { svc.set_display_offset(40).await });
    let msg = answer_browse(&mut core, "browse", json!({"action": "none"})).await;
    assert_eq!(msg.body_json().unwrap()["set_display_offset"], 40);
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn browse_search_includes_input_and_zone() {
    let (connection, mut core) = connected().await;
    let browse = BrowseService::new(connection);
    browse.select_zone("z1");

    let svc = browse.clone();
    let call = tokio::spawn(async move { svc.browse_home("search").await });
    answer_browse(
        &mut core,
        "browse",
        json!({"action": "list", "list": {"title": "Search", "count": 1, "level": 0}}),
    )
    .await;
    call.await.unwrap().unwrap();

    let svc = browse.clone();
    let call = tokio::spawn(async move { svc.search("k-search", "aphex twin").await });
    let msg = answer_browse(&mut core, "browse", json!({"action": "list"})).await;
    assert_eq!(
        msg.body_json().unwrap(),
        &json!({
            "hierarchy": "search",
            "item_key": "k-search",
            "input": "aphex twin",
            "zone_or_output_id": "z1",
        })
    );
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn multi_session_browse_tags_every_body() {
    let (connection, mut core) = connected().await;
    let browse = BrowseService::new_multi_session(connection);

    let svc = browse.clone();
    let call = tokio::spawn(async move { svc.browse_home("albums").await });
    let msg = answer_browse(&mut core, "browse", json!({"action": "list"})).await;
    let key = msg.body_json().unwrap()["multi_session_key"]
        .as_str()
        .expect("missing multi_session_key")
        .to_string();
    assert!(!key.is_empty());
    call.await.unwrap().unwrap();

    let svc = browse.clone();
    let call = tokio::spawn(async move { svc.load(LoadOpts::default()).await });
    let msg = answer_browse(&mut core, "load", json!({"items": []})).await;
    assert_eq!(msg.body_json().unwrap()["multi_session_key"], key.as_str());
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn browse_without_hierarchy_fails_locally() {
    let (connection, _core) = connected().await;
    let browse = BrowseService::new(connection);

    assert!(matches!(
        browse.back().await,
        Err(RoonError::BrowseFailed(_))
    ));
    assert!(matches!(
        browse.load(LoadOpts::default()).await,
        Err(RoonError::LoadFailed(_))
    ));
}
