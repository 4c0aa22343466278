//! Command handlers for the router.
//!
//! Handlers run inside the router task with exclusive access to the session,
//! sequencer and registry. Each returns the success response for its verb
//! and records the events its state change produced; the router sends the
//! response first and then broadcasts the events.
//! - Device: `list`, `select_device`, `connect`, `trigger`, `stop`, ...
//! - Effect: `play_effect`, `stop_effect`, `list_effects`
//! - Client: `ping`, `identify`, `list_clients`, `shutdown`

mod client;
mod device;
mod effect;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};
use vest_core::{DeviceScan, EffectLibrary, Sequencer, SessionManager};
use vest_rpc::protocol::{Command, EventKind, Request, Response};
use vest_types::DeviceDescriptor;

use crate::error::Result;
use crate::registry::{ClientId, ClientRegistry};

pub struct HandlerContext<'a> {
    pub session: &'a mut SessionManager,
    pub sequencer: &'a mut Sequencer,
    pub registry: &'a mut ClientRegistry,
    pub library: &'a EffectLibrary,
    pub client_id: &'a ClientId,
    pub events: Vec<EventKind>,
    pub shutdown_requested: bool,
}

impl HandlerContext<'_> {
    pub fn emit(&mut self, event: EventKind) {
        trace!("Queued event {}", event.name());
        self.events.push(event);
    }

    pub fn device_lost(&mut self, device: Option<DeviceDescriptor>, reason: &str) {
        let event = device_lost(self.sequencer, device, reason);
        self.emit(event);
    }
}

/// The open handle went away: drop any playback and build the event.
pub(crate) fn device_lost(
    sequencer: &mut Sequencer,
    device: Option<DeviceDescriptor>,
    reason: &str,
) -> EventKind {
    if let Some(name) = sequencer.cancel() {
        debug!("Cancelled effect {name}: {reason}");
    }
    EventKind::Disconnected {
        device,
        reason: Some(reason.to_string()),
    }
}

/// Events for a re-enumeration: the lost device first, then the new listing.
pub(crate) fn scan_events(sequencer: &mut Sequencer, scan: &DeviceScan) -> Vec<EventKind> {
    let mut events = Vec::new();
    if let Some(device) = &scan.lost {
        events.push(device_lost(sequencer, Some(device.clone()), "device removed"));
    }
    if scan.changed {
        events.push(EventKind::DevicesChanged {
            devices: scan.devices.clone(),
        });
    }
    events
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Dispatch one request. Always yields exactly one response.
pub async fn handle_request(ctx: &mut HandlerContext<'_>, request: Request) -> Response {
    let verb = request.command.verb();
    trace!("Handling {verb} from {}", ctx.client_id);

    let result = match request.command {
        Command::Ping => client::handle_ping(ctx),
        Command::Identify { name, version } => client::handle_identify(ctx, name, version),
        Command::ListClients => client::handle_list_clients(ctx),
        Command::Shutdown => client::handle_shutdown(ctx),

        Command::List => device::handle_list(ctx),
        Command::SelectDevice {
            bus,
            address,
            serial,
        } => device::handle_select_device(ctx, bus, address, serial.as_deref()),
        Command::GetSelectedDevice => device::handle_get_selected_device(ctx),
        Command::ClearDevice => device::handle_clear_device(ctx),
        Command::Connect => device::handle_connect(ctx).await,
        Command::Disconnect => device::handle_disconnect(ctx),
        Command::Trigger { cell, speed } => device::handle_trigger(ctx, cell, speed),
        Command::Stop => device::handle_stop(ctx),
        Command::Status => device::handle_status(ctx),

        Command::PlayEffect(params) => effect::handle_play_effect(ctx, params),
        Command::StopEffect => effect::handle_stop_effect(ctx),
        Command::ListEffects => effect::handle_list_effects(ctx),
    };

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            debug!("{verb} failed: {e}");
            e.to_response(verb)
        }
    };
    response.with_req_id(request.req_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vest_core::MockBackend;
    use vest_rpc::protocol::{ErrorCode, RequestId};

    struct Harness {
        backend: MockBackend,
        session: SessionManager,
        sequencer: Sequencer,
        registry: ClientRegistry,
        library: EffectLibrary,
        client_id: ClientId,
    }

    impl Harness {
        fn new(devices: u8) -> Self {
            let backend = MockBackend::simulated(devices);
            let mut session = SessionManager::new(Box::new(backend.clone()));
            session.list_devices();
            Self {
                backend,
                session,
                sequencer: Sequencer::new(),
                registry: ClientRegistry::new(),
                library: EffectLibrary::default(),
                client_id: ClientId::from("tester"),
            }
        }

        async fn run(&mut self, line: &str) -> (Response, Vec<EventKind>) {
            let request = Request::parse(line).unwrap();
            let mut ctx = HandlerContext {
                session: &mut self.session,
                sequencer: &mut self.sequencer,
                registry: &mut self.registry,
                library: &self.library,
                client_id: &self.client_id,
                events: Vec::new(),
                shutdown_requested: false,
            };
            let response = handle_request(&mut ctx, request).await;
            (response, ctx.events)
        }

        async fn connect(&mut self) {
            let (response, _) = self.run(r#"{"cmd":"select_device","bus":1,"address":1}"#).await;
            assert!(response.success);
            let (response, _) = self.run(r#"{"cmd":"connect"}"#).await;
            assert!(response.success);
        }
    }

    fn names(events: &[EventKind]) -> Vec<&'static str> {
        events.iter().map(EventKind::name).collect()
    }

    #[tokio::test]
    async fn test_req_id_is_echoed() {
        let mut h = Harness::new(1);
        let (response, _) = h.run(r#"{"cmd":"ping","req_id":"abc"}"#).await;
        assert_eq!(response.req_id, Some(RequestId::from("abc")));

        let (response, _) = h.run(r#"{"cmd":"trigger","cell":1,"speed":2,"req_id":7}"#).await;
        assert_eq!(response.req_id, Some(RequestId::from(7)));
        assert!(!response.success);
    }

    #[tokio::test]
    async fn test_select_device_emits_device_selected() {
        let mut h = Harness::new(2);
        let (response, events) = h.run(r#"{"cmd":"select_device","bus":1,"address":2}"#).await;

        assert!(response.success);
        assert_eq!(response.response, "select_device");
        assert_eq!(response.get("device").unwrap()["address"], json!(2));
        assert_eq!(names(&events), vec!["device_selected"]);
        assert_eq!(h.session.selected().unwrap().address, 2);
    }

    #[tokio::test]
    async fn test_select_unknown_device() {
        let mut h = Harness::new(1);
        let (response, events) = h.run(r#"{"cmd":"select_device","serial":"NOPE"}"#).await;

        assert!(!response.success);
        assert_eq!(response.code, Some(ErrorCode::NotFound));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_select_without_matcher_is_invalid() {
        let mut h = Harness::new(1);
        let (response, _) = h.run(r#"{"cmd":"select_device","bus":1}"#).await;
        assert_eq!(response.code, Some(ErrorCode::InvalidParams));
    }

    #[tokio::test]
    async fn test_select_other_device_disconnects() {
        let mut h = Harness::new(2);
        h.connect().await;
        let (response, events) = h.run(r#"{"cmd":"select_device","serial":"MOCK-0002"}"#).await;

        assert!(response.success);
        assert_eq!(names(&events), vec!["disconnected", "device_selected"]);
        assert!(!h.session.is_connected());
        assert_eq!(h.backend.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_trigger_without_connection() {
        let mut h = Harness::new(1);
        let (response, events) = h.run(r#"{"cmd":"trigger","cell":2,"speed":5}"#).await;

        assert!(!response.success);
        assert_eq!(response.code, Some(ErrorCode::NotConnected));
        assert!(response.message.is_some());
        assert!(events.is_empty());
        assert!(h.backend.writes().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_emits_effect_triggered() {
        let mut h = Harness::new(1);
        h.connect().await;
        let (response, events) = h.run(r#"{"cmd":"trigger","cell":2,"speed":5}"#).await;

        assert!(response.success);
        assert_eq!(
            events,
            vec![EventKind::EffectTriggered {
                cell: vest_types::CellId::FRONT_UPPER_LEFT,
                speed: vest_types::Intensity::new(5).unwrap(),
                effect_name: None,
            }]
        );
        assert_eq!(h.backend.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_out_of_range_rejected_at_parse() {
        assert!(Request::parse(r#"{"cmd":"trigger","cell":2,"speed":11}"#).is_err());
        assert!(Request::parse(r#"{"cmd":"trigger","cell":8,"speed":1}"#).is_err());
    }

    #[tokio::test]
    async fn test_trigger_on_removed_device_disconnects() {
        let mut h = Harness::new(1);
        h.connect().await;
        h.backend.remove_device(1, 1);

        let (response, events) = h.run(r#"{"cmd":"trigger","cell":2,"speed":5}"#).await;
        assert_eq!(response.code, Some(ErrorCode::HardwareWriteError));
        assert_eq!(names(&events), vec!["disconnected"]);
        assert!(!h.session.is_connected());
    }

    #[tokio::test]
    async fn test_connect_twice_is_quiet() {
        let mut h = Harness::new(1);
        h.run(r#"{"cmd":"select_device","bus":1,"address":1}"#).await;

        let (first, events) = h.run(r#"{"cmd":"connect"}"#).await;
        assert!(first.success);
        assert_eq!(names(&events), vec!["connected"]);

        let (second, events) = h.run(r#"{"cmd":"connect"}"#).await;
        assert!(second.success);
        assert!(events.is_empty());
        assert_eq!(h.backend.total_opens(), 1);
    }

    #[tokio::test]
    async fn test_connect_without_selection() {
        let mut h = Harness::new(1);
        let (response, _) = h.run(r#"{"cmd":"connect"}"#).await;
        assert_eq!(response.code, Some(ErrorCode::NoDeviceSelected));
    }

    #[tokio::test]
    async fn test_connect_busy_device() {
        let mut h = Harness::new(1);
        h.run(r#"{"cmd":"select_device","bus":1,"address":1}"#).await;
        h.backend
            .fail_next_open(vest_core::DeviceError::Busy("claimed".to_string()));

        let (response, events) = h.run(r#"{"cmd":"connect"}"#).await;
        assert_eq!(response.code, Some(ErrorCode::ConnectError));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_only_emits_when_open() {
        let mut h = Harness::new(1);
        let (response, events) = h.run(r#"{"cmd":"disconnect"}"#).await;
        assert!(response.success);
        assert!(events.is_empty());

        h.connect().await;
        let (_, events) = h.run(r#"{"cmd":"disconnect"}"#).await;
        assert_eq!(names(&events), vec!["disconnected"]);
    }

    #[tokio::test]
    async fn test_clear_device() {
        let mut h = Harness::new(1);
        h.connect().await;
        let (response, events) = h.run(r#"{"cmd":"clear_device"}"#).await;

        assert!(response.success);
        assert_eq!(names(&events), vec!["disconnected", "device_cleared"]);
        assert!(h.session.selected().is_none());

        let (_, events) = h.run(r#"{"cmd":"clear_device"}"#).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_list_reports_changes() {
        let mut h = Harness::new(1);
        let (response, events) = h.run(r#"{"cmd":"list"}"#).await;
        assert_eq!(response.get("devices").unwrap().as_array().unwrap().len(), 1);
        assert!(events.is_empty());

        h.backend
            .add_device(vest_types::DeviceDescriptor::new(2, 9).with_serial("EXTRA"));
        let (response, events) = h.run(r#"{"cmd":"list"}"#).await;
        assert_eq!(response.get("devices").unwrap().as_array().unwrap().len(), 2);
        assert_eq!(names(&events), vec!["devices_changed"]);
    }

    #[tokio::test]
    async fn test_list_on_enumeration_failure_is_empty() {
        let mut h = Harness::new(1);
        h.backend
            .fail_enumeration(Some(vest_core::DeviceError::Enumeration("bus".to_string())));
        let (response, events) = h.run(r#"{"cmd":"list"}"#).await;

        assert!(response.success);
        assert_eq!(response.get("devices"), Some(&json!([])));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_stop_when_disconnected() {
        let mut h = Harness::new(1);
        let (response, events) = h.run(r#"{"cmd":"stop"}"#).await;
        assert!(response.success);
        assert_eq!(names(&events), vec!["all_stopped"]);
    }

    #[tokio::test]
    async fn test_stop_keeps_playback() {
        let mut h = Harness::new(1);
        h.connect().await;
        h.run(r#"{"cmd":"play_effect","effect_name":"heartbeat"}"#).await;

        let (_, events) = h.run(r#"{"cmd":"stop"}"#).await;
        assert_eq!(names(&events), vec!["all_stopped"]);
        assert!(h.sequencer.active().is_some());
        assert_eq!(h.backend.writes().len(), 8);
    }

    #[tokio::test]
    async fn test_stop_effect_when_idle() {
        let mut h = Harness::new(1);
        let (response, events) = h.run(r#"{"cmd":"stop_effect"}"#).await;

        assert!(response.success);
        assert_eq!(response.get("cancelled"), Some(&json!(null)));
        assert_eq!(names(&events), vec!["all_stopped"]);
    }

    #[tokio::test]
    async fn test_play_named_effect() {
        let mut h = Harness::new(1);
        h.connect().await;
        let (response, events) = h.run(r#"{"cmd":"play_effect","effect_name":"heartbeat"}"#).await;

        assert!(response.success);
        assert_eq!(response.get("effect_name"), Some(&json!("heartbeat")));
        assert_eq!(response.get("total_steps"), Some(&json!(4)));
        assert_eq!(names(&events), vec!["effect_started"]);
        // Steps run on the router's schedule, not inside the handler.
        assert!(h.backend.writes().is_empty());
    }

    #[tokio::test]
    async fn test_play_unknown_effect() {
        let mut h = Harness::new(1);
        h.connect().await;
        let (response, events) = h.run(r#"{"cmd":"play_effect","effect_name":"nope"}"#).await;
        assert_eq!(response.code, Some(ErrorCode::UnknownEffect));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_play_requires_connection() {
        let mut h = Harness::new(1);
        let (response, events) = h.run(r#"{"cmd":"play_effect","effect_name":"heartbeat"}"#).await;
        assert_eq!(response.code, Some(ErrorCode::NotConnected));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_play_single_step_and_steps() {
        let mut h = Harness::new(1);
        h.connect().await;

        let (response, _) =
            h.run(r#"{"cmd":"play_effect","cells":[0,7],"speed":3,"duration_ms":40}"#).await;
        assert!(response.success);
        assert_eq!(response.get("total_steps"), Some(&json!(1)));

        let (response, _) = h.run(
            r#"{"cmd":"play_effect","steps":[
                {"cells":[1],"speed":2,"duration_ms":10},
                {"cells":[2],"speed":4,"duration_ms":20}]}"#,
        )
        .await;
        assert!(response.success);
        assert_eq!(response.get("replaced"), Some(&json!("ad_hoc")));
        assert_eq!(response.get("duration_ms"), Some(&json!(30)));
    }

    #[tokio::test]
    async fn test_play_ambiguous_source_is_invalid() {
        let mut h = Harness::new(1);
        h.connect().await;
        let (response, _) = h.run(
            r#"{"cmd":"play_effect","effect_name":"heartbeat","cells":[1],"speed":2,"duration_ms":5}"#,
        )
        .await;
        assert_eq!(response.code, Some(ErrorCode::InvalidParams));
    }

    #[tokio::test]
    async fn test_list_effects() {
        let mut h = Harness::new(1);
        let (response, _) = h.run(r#"{"cmd":"list_effects"}"#).await;

        assert_eq!(response.get("effects").unwrap().as_array().unwrap().len(), 26);
        assert_eq!(
            response.get("categories"),
            Some(&json!(["weapons", "impacts", "melee", "driving", "special"]))
        );
    }

    #[tokio::test]
    async fn test_status() {
        let mut h = Harness::new(1);
        h.connect().await;
        h.run(r#"{"cmd":"play_effect","effect_name":"heartbeat"}"#).await;

        let (response, _) = h.run(r#"{"cmd":"status"}"#).await;
        assert_eq!(response.get("connected"), Some(&json!(true)));
        assert_eq!(response.get("state"), Some(&json!("connected")));
        assert_eq!(response.get("device").unwrap()["bus"], json!(1));
        assert_eq!(response.get("playback").unwrap()["effect_name"], json!("heartbeat"));
    }

    #[tokio::test]
    async fn test_ping_and_identify() {
        let mut h = Harness::new(1);
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        h.registry.register(h.client_id.clone(), tx, None);

        let (response, _) = h.run(r#"{"cmd":"ping"}"#).await;
        assert_eq!(response.get("alive"), Some(&json!(true)));
        assert_eq!(response.get("client_count"), Some(&json!(1)));
        assert_eq!(response.get("has_device_selected"), Some(&json!(false)));

        let (response, _) = h.run(r#"{"cmd":"identify","name":"ui","version":"2.0"}"#).await;
        assert!(response.success);
        assert_eq!(response.get("client_id"), Some(&json!("tester")));

        let (response, _) = h.run(r#"{"cmd":"list_clients"}"#).await;
        let clients = response.get("clients").unwrap().as_array().unwrap();
        assert_eq!(clients[0]["name"], json!("ui"));
    }

    #[tokio::test]
    async fn test_shutdown_sets_flag() {
        let mut h = Harness::new(1);
        let request = Request::parse(r#"{"cmd":"shutdown"}"#).unwrap();
        let mut ctx = HandlerContext {
            session: &mut h.session,
            sequencer: &mut h.sequencer,
            registry: &mut h.registry,
            library: &h.library,
            client_id: &h.client_id,
            events: Vec::new(),
            shutdown_requested: false,
        };
        let response = handle_request(&mut ctx, request).await;
        assert!(response.success);
        assert!(ctx.shutdown_requested);
    }
}
