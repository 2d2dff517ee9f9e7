//! End-to-end scenarios for the Client Acquisition Controller
//!
//! Direct capture and the daemon link are scripted test doubles; the
//! controller itself is the production state machine.

use boothcam::client::{AcquisitionController, ControllerEvent, ControllerState, PreviewSource};
use boothcam::config::ClientConfig;
use boothcam::errors::{CaptureError, FailureReason};
use boothcam::invariant_ppt::{
    clear_invariant_log, contract_test, RELEASE_BEFORE_ATTEMPT, SINGLE_CAPTURE_SOURCE,
    SINGLE_PREVIEW_SOURCE,
};
use boothcam::testing::{ScriptedMedia, StubDaemonLink};
use boothcam::types::DeviceInfo;

fn cameras() -> Vec<DeviceInfo> {
    vec![
        DeviceInfo::new("0", "Integrated Webcam"),
        DeviceInfo::new("1", "USB Camera"),
    ]
}

#[test]
fn direct_capture_succeeds_first_try() {
    let media = ScriptedMedia::new(cameras());
    let stats = media.clone();
    let daemon = StubDaemonLink::healthy();
    let link = daemon.clone();

    let mut controller = AcquisitionController::new(media, Some(daemon));
    controller.handle(ControllerEvent::Initialize);

    let view = controller.view();
    assert_eq!(view.state, ControllerState::DirectActive);
    assert!(view.banner.is_empty());
    assert!(!view.plan_b_badge);
    assert!(matches!(view.preview, PreviewSource::Direct { .. }));
    assert_eq!(view.devices.len(), 2);
    assert_eq!(stats.live(), 1);
    // Plan B never consulted
    assert_eq!(link.health_calls(), 0);

    let still = controller.snapshot().unwrap();
    assert_eq!(&still.data[..2], &[0xFF, 0xD8]);
}

#[test]
fn permission_denied_falls_back_to_healthy_daemon() {
    let media = ScriptedMedia::new(cameras());
    media.fail_all(CaptureError::permission_denied("NotAllowedError"));
    let stats = media.clone();

    let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::healthy()));
    controller.handle(ControllerEvent::Initialize);

    let view = controller.view();
    assert_eq!(view.state, ControllerState::PlanBActive);
    assert!(view.plan_b_badge);
    assert_eq!(view.daemon_notice, None);
    assert_eq!(
        view.preview,
        PreviewSource::Daemon {
            stream_url: "http://127.0.0.1:8080/stream".to_string()
        }
    );

    let attempts: Vec<_> = view.banner.iter().map(|f| f.attempt.as_str()).collect();
    assert_eq!(attempts, ["any-camera", "facing-user", "preferred-resolution"]);
    assert!(view
        .banner
        .iter()
        .all(|f| f.reason == FailureReason::PermissionDenied));
    assert_eq!(stats.live(), 0);
}

#[test]
fn everything_unreachable_shows_placeholder_and_notice() {
    let media = ScriptedMedia::new(Vec::new());
    let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::unreachable()));
    controller.handle(ControllerEvent::Initialize);

    let view = controller.view();
    assert_eq!(view.state, ControllerState::PlanBActive);
    assert_eq!(view.banner.len(), 3);
    assert!(view
        .banner
        .iter()
        .all(|f| f.reason == FailureReason::DeviceNotFound));
    assert!(matches!(
        &view.preview,
        PreviewSource::Placeholder { message } if message.contains("daemon unreachable")
    ));
    assert!(view.daemon_notice.unwrap().starts_with("daemon-unreachable"));

    let err = controller.snapshot().unwrap_err();
    assert_eq!(err.reason, FailureReason::DaemonUnreachable);
}

#[test]
fn plan_b_is_sticky_until_retry() {
    let media = ScriptedMedia::new(cameras());
    media.fail_all(CaptureError::busy("claimed by another process"));
    let stats = media.clone();

    let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::healthy()));
    controller.handle(ControllerEvent::Initialize);
    assert_eq!(controller.state(), ControllerState::PlanBActive);

    // The camera frees up, but nothing happens until an operator asks
    stats.succeed();
    controller.handle(ControllerEvent::DevicesChanged);
    controller.handle(ControllerEvent::VisibilityChanged { visible: false });
    controller.handle(ControllerEvent::VisibilityChanged { visible: true });
    controller.diagnostics();
    assert_eq!(controller.state(), ControllerState::PlanBActive);
    assert_eq!(stats.opened(), 0);

    controller.handle(ControllerEvent::Retry);
    assert_eq!(controller.state(), ControllerState::DirectActive);
    assert!(controller.banner().is_empty());
    assert_eq!(stats.opened(), 1);
}

#[test]
fn banner_accumulates_across_retries() {
    let media = ScriptedMedia::new(Vec::new());
    let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::healthy()));
    controller.handle(ControllerEvent::Initialize);
    controller.handle(ControllerEvent::Retry);

    assert_eq!(controller.state(), ControllerState::PlanBActive);
    assert_eq!(controller.banner().len(), 6);
}

#[test]
fn selected_device_is_tried_last() {
    let media = ScriptedMedia::new(cameras());
    media.fail_unless_device("1", CaptureError::busy("in use"));
    let stats = media.clone();

    let config = ClientConfig {
        preferred_device: Some("1".to_string()),
        preferred_resolution: [640, 480],
        ..ClientConfig::default()
    };
    let mut controller =
        AcquisitionController::from_config(media, Some(StubDaemonLink::healthy()), &config);
    controller.handle(ControllerEvent::Initialize);

    assert_eq!(controller.state(), ControllerState::DirectActive);
    let requests = stats.log().requests;
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[2].resolution, Some((640, 480)));
    assert_eq!(requests[3].device_id.as_deref(), Some("1"));
    assert_eq!(controller.banner().len(), 0);
}

#[test]
fn hidden_page_releases_camera_and_resumes() {
    clear_invariant_log();
    let media = ScriptedMedia::new(cameras());
    let stats = media.clone();

    let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::healthy()));
    controller.handle(ControllerEvent::Initialize);
    assert_eq!(stats.live(), 1);

    controller.handle(ControllerEvent::VisibilityChanged { visible: false });
    assert_eq!(stats.live(), 0);
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(matches!(controller.preview(), PreviewSource::Placeholder { .. }));

    controller.handle(ControllerEvent::VisibilityChanged { visible: true });
    assert_eq!(controller.state(), ControllerState::DirectActive);

    controller.handle(ControllerEvent::Retry);
    controller.handle(ControllerEvent::DeviceSelected(Some("1".to_string())));

    assert_eq!(stats.live(), 1);
    assert_eq!(stats.max_live(), 1);
    assert_eq!(stats.opened(), stats.stopped() + 1);

    contract_test(
        "hidden_page_releases_camera_and_resumes",
        &[SINGLE_CAPTURE_SOURCE, RELEASE_BEFORE_ATTEMPT, SINGLE_PREVIEW_SOURCE],
    );
}

#[test]
fn retry_while_hidden_waits_for_visibility() {
    let media = ScriptedMedia::new(cameras());
    media.fail_all(CaptureError::busy("claimed by another process"));
    let stats = media.clone();

    let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::healthy()));
    controller.handle(ControllerEvent::Initialize);
    assert_eq!(controller.state(), ControllerState::PlanBActive);

    stats.succeed();
    controller.handle(ControllerEvent::VisibilityChanged { visible: false });
    controller.handle(ControllerEvent::Retry);
    assert_eq!(controller.state(), ControllerState::PlanBActive);
    assert_eq!(stats.opened(), 0);
    assert_eq!(stats.live(), 0);

    controller.handle(ControllerEvent::VisibilityChanged { visible: true });
    assert_eq!(controller.state(), ControllerState::DirectActive);
    assert_eq!(stats.opened(), 1);
    assert_eq!(stats.live(), 1);
}

#[test]
fn initialize_while_hidden_starts_on_visibility() {
    let media = ScriptedMedia::new(cameras());
    let stats = media.clone();

    let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::healthy()));
    controller.handle(ControllerEvent::VisibilityChanged { visible: false });
    controller.handle(ControllerEvent::Initialize);
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(stats.opened(), 0);

    controller.handle(ControllerEvent::VisibilityChanged { visible: true });
    assert_eq!(controller.state(), ControllerState::DirectActive);
    assert_eq!(stats.live(), 1);
}

#[test]
fn dropping_controller_releases_track() {
    let media = ScriptedMedia::new(cameras());
    let stats = media.clone();
    {
        let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::healthy()));
        controller.handle(ControllerEvent::Initialize);
        assert_eq!(stats.live(), 1);
    }
    assert_eq!(stats.live(), 0);
}

#[test]
fn daemon_outage_in_plan_b_is_reported() {
    let media = ScriptedMedia::new(Vec::new());
    let daemon = StubDaemonLink::healthy();
    let link = daemon.clone();
    let mut controller = AcquisitionController::new(media, Some(daemon));
    controller.handle(ControllerEvent::Initialize);
    assert!(matches!(controller.preview(), PreviewSource::Daemon { .. }));

    link.set_reachable(false);
    assert!(controller.snapshot().is_err());
    assert!(controller.daemon_error().is_some());
    assert!(matches!(controller.preview(), PreviewSource::Placeholder { .. }));

    link.set_reachable(true);
    assert!(controller.snapshot().is_ok());
    assert!(controller.daemon_error().is_none());
    assert!(matches!(controller.preview(), PreviewSource::Daemon { .. }));
}

#[test]
fn view_serializes_for_the_page() {
    let media = ScriptedMedia::new(Vec::new());
    let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::healthy()));
    controller.handle(ControllerEvent::Initialize);

    let json = serde_json::to_value(controller.view()).unwrap();
    assert_eq!(json["state"], "plan-b-active");
    assert_eq!(json["preview"]["kind"], "daemon");
    assert_eq!(json["plan_b_badge"], true);
    assert_eq!(json["banner"][0]["reason"], "device-not-found");
}
