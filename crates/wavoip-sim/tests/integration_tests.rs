//! End-to-end tests of the orchestrator against simulated devices
//!
//! These tests exercise:
//! - Waking a hibernating device and calling from it
//! - Fallback across busy and failing devices
//! - Inbound calls with official transports and SDP answers
//! - Device management commands (logout, pairing code) and contact sync

use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;

use wavoip_core::protocol::wire::{CALL_SDP_ANSWER, CALL_START};
use wavoip_core::protocol::{CallStatus, CallType, DeviceStatus, DeviceToken, TransportStatus};
use wavoip_core::{CallAttempt, CallRequest, CallView, SessionConfig, SessionError, Wavoip};
use wavoip_sim::{
    MediaEvent, SimDeviceConfig, SimMediaConfig, SimulatedMedia, SimulatedNetwork, StartBehavior,
};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    pub struct Harness {
        pub network: SimulatedNetwork,
        pub media: SimulatedMedia,
        pub wavoip: Wavoip,
    }

    pub fn harness(devices: &[(&str, SimDeviceConfig)]) -> Harness {
        harness_with_media(devices, SimMediaConfig::default())
    }

    pub fn harness_with_media(devices: &[(&str, SimDeviceConfig)], media: SimMediaConfig) -> Harness {
        let network = SimulatedNetwork::default();
        for (token, config) in devices {
            network.configure(*token, config.clone());
        }
        let media = SimulatedMedia::new(media);
        let config = SessionConfig {
            ack_timeout_ms: 200,
            ..Default::default()
        };
        let wavoip = Wavoip::new(Arc::new(network.clone()), Arc::new(media.clone()), config);
        wavoip.add_devices(devices.iter().map(|(token, _)| *token));
        Harness {
            network,
            media,
            wavoip,
        }
    }

    /// Wait until every device has synced its initial status
    pub async fn settled(wavoip: &Wavoip) {
        for device in wavoip.devices() {
            device.refresh().await.unwrap();
        }
    }

    pub async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }
}

// ============================================================================
// Outgoing Call Tests
// ============================================================================

mod outgoing_tests {
    use super::*;

    #[tokio::test]
    async fn hibernating_device_wakes_then_calls() {
        let h = helpers::harness(&[(
            "sleepy",
            SimDeviceConfig::default()
                .with_status(DeviceStatus::Hibernating)
                .answering_after(20),
        )]);
        helpers::settled(&h.wavoip).await;

        let err = h.wavoip.start_call(CallRequest::new("5511999999999")).await.unwrap_err();
        assert_eq!(
            err.devices[0].reason,
            SessionError::NotCallable(Some(DeviceStatus::Hibernating))
        );

        let handles = h.wavoip.wake_up_devices(&[]);
        assert_eq!(handles.len(), 1);
        let outcome = handles.into_iter().next().unwrap().outcome().await;
        assert!(outcome.waken);

        let device = h.wavoip.device(&"sleepy".into()).unwrap();
        assert_eq!(device.status(), Some(DeviceStatus::Open));

        let call = h.wavoip.start_call(CallRequest::new("5511999999999")).await.unwrap();
        helpers::eventually(|| call.view() == CallView::Active).await;
        assert_eq!(call.status(), CallStatus::Active);

        let active = call.as_active().unwrap();
        let analyser = active.audio_analyser().await.unwrap();
        assert_eq!(analyser.frequency_bin_count(), 32);
        helpers::eventually(|| active.connection_status() == TransportStatus::Connected).await;

        active.end().await.unwrap();
        helpers::eventually(|| call.is_terminal()).await;
        helpers::eventually(|| !h.media.is_attached(call.id())).await;
        assert!(device.current_call().is_none());
    }

    #[tokio::test]
    async fn unwakeable_device_reports_not_waken() {
        let h = helpers::harness(&[(
            "stuck",
            SimDeviceConfig::default()
                .with_status(DeviceStatus::Hibernating)
                .unwakeable(),
        )]);
        helpers::settled(&h.wavoip).await;

        let mut wakeups = h.wavoip.wake_up_devices_iterator(&[DeviceToken::new("stuck")]);
        let outcome = wakeups.next().await.unwrap();
        assert!(!outcome.waken);
        assert!(wakeups.next().await.is_none());
    }

    #[tokio::test]
    async fn dispatch_falls_back_across_devices() {
        let h = helpers::harness(&[
            ("busy", SimDeviceConfig::default().with_start(StartBehavior::Busy)),
            (
                "broken",
                SimDeviceConfig::default().with_start(StartBehavior::Fail {
                    reason: "no credit".into(),
                }),
            ),
            ("good", SimDeviceConfig::default()),
        ]);
        helpers::settled(&h.wavoip).await;

        let mut attempts = h.wavoip.start_call_iterator(CallRequest::new("5511999999999"));
        let mut seen = Vec::new();
        while let Some(attempt) = attempts.next().await {
            match attempt {
                CallAttempt::Failed { token, reason } => seen.push((token, Some(reason))),
                CallAttempt::Connected { token, .. } => seen.push((token, None)),
                CallAttempt::Exhausted { message } => panic!("unexpected exhaustion: {message}"),
            }
        }

        assert_eq!(
            seen,
            vec![
                (
                    DeviceToken::new("busy"),
                    Some(SessionError::Busy("device is busy".into()))
                ),
                (
                    DeviceToken::new("broken"),
                    Some(SessionError::Rejected("no credit".into()))
                ),
                (DeviceToken::new("good"), None),
            ]
        );
        for token in ["busy", "broken", "good"] {
            assert_eq!(h.network.log().count(&token.into(), CALL_START), 1);
        }
    }

    #[tokio::test]
    async fn silent_device_times_out_then_next_answers() {
        let h = helpers::harness(&[
            ("silent", SimDeviceConfig::default().with_start(StartBehavior::Silent)),
            ("good", SimDeviceConfig::default()),
        ]);
        helpers::settled(&h.wavoip).await;

        let call = h
            .wavoip
            .start_call(CallRequest::new("5511").from_devices(["silent", "good"]))
            .await
            .unwrap();
        assert_eq!(call.device_token(), &DeviceToken::new("good"));
    }
}

// ============================================================================
// Inbound Call Tests
// ============================================================================

mod inbound_tests {
    use super::*;

    #[tokio::test]
    async fn official_offer_sends_sdp_answer() {
        let h = helpers::harness(&[(
            "official",
            SimDeviceConfig::default().with_call_type(CallType::Official),
        )]);
        helpers::settled(&h.wavoip).await;

        let offers = Arc::new(Mutex::new(Vec::new()));
        let sink = offers.clone();
        let _sub = h.wavoip.on_offer(move |offer| sink.lock().unwrap().push(offer.clone()));

        let token = DeviceToken::new("official");
        let control = h.network.control(&token).unwrap();
        let id = control.ring("5521988887777").await.unwrap().unwrap();

        helpers::eventually(|| offers.lock().unwrap().len() == 1).await;
        let offer = offers.lock().unwrap()[0].clone();
        assert_eq!(offer.id(), &id);
        assert_eq!(offer.call_type(), CallType::Official);

        let active = offer.accept().await.unwrap();
        helpers::eventually(|| h.network.log().count(&token, CALL_SDP_ANSWER) == 1).await;
        helpers::eventually(|| active.status() == CallStatus::Active).await;

        control.hang_up(CallStatus::Ended).await.unwrap();
        helpers::eventually(|| active.is_terminal()).await;
        helpers::eventually(|| !h.media.is_attached(&id)).await;
        assert_eq!(
            h.media.history(),
            vec![
                MediaEvent::Attached(id.clone(), CallType::Official),
                MediaEvent::Detached(id)
            ]
        );
    }

    #[tokio::test]
    async fn rejected_offer_frees_device() {
        let h = helpers::harness(&[("dev", SimDeviceConfig::default())]);
        helpers::settled(&h.wavoip).await;

        let offers = Arc::new(Mutex::new(Vec::new()));
        let sink = offers.clone();
        let _sub = h.wavoip.on_offer(move |offer| sink.lock().unwrap().push(offer.clone()));

        let token = DeviceToken::new("dev");
        let control = h.network.control(&token).unwrap();
        control.ring("5521").await.unwrap().unwrap();

        let device = h.wavoip.device(&token).unwrap();
        helpers::eventually(|| offers.lock().unwrap().len() == 1).await;
        let offer = offers.lock().unwrap()[0].clone();
        assert_eq!(device.current_call().unwrap().view(), CallView::Offer);
        assert_eq!(control.ring("5531").await.unwrap(), None);

        offer.reject().await.unwrap();
        helpers::eventually(|| device.current_call().is_none()).await;
        assert_eq!(offer.status(), CallStatus::Rejected);
    }

    #[tokio::test]
    async fn microphone_failure_reaches_active_call() {
        let h = helpers::harness_with_media(
            &[("dev", SimDeviceConfig::default().answering_after(10))],
            SimMediaConfig {
                microphone_error: Some("NotAllowedError".into()),
                ..Default::default()
            },
        );
        helpers::settled(&h.wavoip).await;

        let err = h.wavoip.multimedia_devices().unwrap_err();
        assert_eq!(err.to_string(), "Microphone permission was denied");

        let call = h.wavoip.start_call(CallRequest::new("5511")).await.unwrap();
        helpers::eventually(|| call.view() == CallView::Active).await;
        let err = call.as_active().unwrap().audio_analyser().await.unwrap_err();
        assert_eq!(err.to_string(), "Microphone permission was denied");
    }
}

// ============================================================================
// Device Management Tests
// ============================================================================

mod management_tests {
    use super::*;

    #[tokio::test]
    async fn logout_publishes_qrcode_and_enables_pairing() {
        let h = helpers::harness(&[("dev", SimDeviceConfig::default())]);
        helpers::settled(&h.wavoip).await;
        let device = h.wavoip.device(&"dev".into()).unwrap();

        assert!(device.request_pairing_code("5511999991234").await.is_err());

        device.logout().await.unwrap();
        helpers::eventually(|| device.status() == Some(DeviceStatus::Close)).await;
        helpers::eventually(|| device.qrcode().as_deref() == Some("sim-qrcode-dev")).await;
        assert!(device.can_call().is_err());

        let code = device.request_pairing_code("5511999991234").await.unwrap();
        assert_eq!(code, "WAVO-1234");
    }

    #[tokio::test]
    async fn contact_binding_arrives_on_connect() {
        let config = SimDeviceConfig {
            phone: "5511987650000".into(),
            ..SimDeviceConfig::default()
        }
        .with_call_type(CallType::Official);
        let h = helpers::harness(&[("dev", config)]);
        let device = h.wavoip.device(&"dev".into()).unwrap();

        helpers::eventually(|| device.contact().official.is_some()).await;
        let contact = device.contact();
        assert_eq!(contact.official.unwrap().phone, "5511987650000");
        assert!(contact.unofficial.is_none());
    }

    #[tokio::test]
    async fn multimedia_devices_are_listed() {
        let h = helpers::harness(&[]);
        let devices = h.wavoip.multimedia_devices().unwrap();
        assert_eq!(devices.microphones.len(), 1);
        assert_eq!(devices.speakers.len(), 1);
    }
}

// ============================================================================
// Property Tests
// ============================================================================

fn any_start() -> impl Strategy<Value = StartBehavior> {
    prop_oneof![
        Just(StartBehavior::Accept),
        Just(StartBehavior::Busy),
        Just(StartBehavior::Fail {
            reason: "refused".into()
        }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Devices are tried in registration order and nobody after the winner is asked
    #[test]
    fn dispatch_stops_at_first_accepting_device(starts in prop::collection::vec(any_start(), 1..6)) {
        let tokens: Vec<String> = (0..starts.len()).map(|i| format!("dev-{i}")).collect();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let (winner, asked) = runtime.block_on(async {
            let devices: Vec<(&str, SimDeviceConfig)> = tokens
                .iter()
                .zip(&starts)
                .map(|(token, start)| (token.as_str(), SimDeviceConfig::default().with_start(start.clone())))
                .collect();
            let h = helpers::harness(&devices);
            helpers::settled(&h.wavoip).await;

            let winner = h
                .wavoip
                .start_call(CallRequest::new("5511"))
                .await
                .ok()
                .map(|call| call.device_token().clone());
            let asked: Vec<usize> = tokens
                .iter()
                .map(|t| h.network.log().count(&t.as_str().into(), CALL_START))
                .collect();
            (winner, asked)
        });

        let first_accept = starts.iter().position(|s| *s == StartBehavior::Accept);
        prop_assert_eq!(winner, first_accept.map(|i| DeviceToken::new(tokens[i].clone())));
        let last_asked = first_accept.unwrap_or(starts.len() - 1);
        for (i, count) in asked.iter().enumerate() {
            prop_assert_eq!(*count, usize::from(i <= last_asked));
        }
    }
}
