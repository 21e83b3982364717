use std::cell::Cell;
use std::rc::Rc;
use std::sync::mpsc::{Receiver, TryRecvError};
use tempfile::TempDir;
use traceflow_runtime::{
    FlowEvent, LifecycleState, MessageType, ProcessContext, TimerAction, TraceflowConfig,
};
use traceflow_testing::fixtures::chat_update_envelope;
use traceflow_testing::{Payload, at, init_test_logging};
use traceflow_types::AgentId;

fn context() -> ProcessContext {
    init_test_logging();
    ProcessContext::init(TraceflowConfig::default(), at(0)).unwrap()
}

fn drain(rx: &Receiver<FlowEvent>) -> Vec<FlowEvent> {
    rx.try_iter().collect()
}

fn count(events: &[FlowEvent], wanted: &FlowEvent) -> usize {
    events.iter().filter(|e| *e == wanted).count()
}

#[test]
fn test_chat_updates_reduce_and_notify() {
    let mut ctx = context();
    let rx = ctx.subscribe_channel();
    let order = Payload::agent("OrderManagement", "s1");
    let payloads = [
        order.agent_invocation("OrderManagement", "Where is order A-1?"),
        order.model_input("Look up order A-1"),
        order.model_output("Order A-1 shipped yesterday"),
        order.final_response("Your order shipped yesterday."),
    ];

    for (i, trace) in payloads.iter().enumerate() {
        let change = ctx.handle_message("s1", &chat_update_envelope(trace), at(i as i64 * 250));
        assert!(change.is_some());
    }

    assert_eq!(ctx.state(), LifecycleState::Freezing);
    assert_eq!(ctx.current_session(), Some("s1"));
    let events = drain(&rx);
    let updates = events
        .iter()
        .filter(|e| matches!(e, FlowEvent::TraceUpdated { node: AgentId::OrderManagement, .. }))
        .count();
    assert_eq!(updates, 4);
    assert_eq!(
        count(
            &events,
            &FlowEvent::FinalMessageDetected {
                preserve_trace_data: true
            }
        ),
        1
    );

    let shown = ctx.trace_for(AgentId::OrderManagement, true).unwrap();
    assert!(shown.is_complete);
    assert_eq!(shown.final_elapsed_time.as_deref(), Some("0.75"));
    assert_eq!(ctx.group("s1"), Some(&shown));
    assert!(ctx.trace_for(AgentId::ProductRecommendation, true).is_none());
}

#[test]
fn test_untagged_final_completes_specialist_turn() {
    let mut ctx = context();
    let rx = ctx.subscribe_channel();
    let order = Payload::agent("OrderManagement", "s1");
    let untagged = Payload::untagged("s1");
    let payloads = [
        order.agent_invocation("OrderManagement", "Where is order A-1?"),
        order.model_input("Look up order A-1"),
        untagged.model_output("It left the warehouse yesterday"),
        untagged.final_response("Your parcel left yesterday."),
    ];

    for (i, trace) in payloads.iter().enumerate() {
        ctx.handle_message("s1", &chat_update_envelope(trace), at(i as i64 * 250));
    }

    let group = ctx.group("s1").unwrap();
    assert!(group.is_complete);
    assert_eq!(group.step_count(), 2);
    assert_eq!(group.final_elapsed_time.as_deref(), Some("0.75"));

    let shown = ctx.trace_for(AgentId::OrderManagement, true).unwrap();
    assert_eq!(shown.id, "s1");
    assert!(shown.is_complete);
    assert_eq!(
        shown.final_response.as_deref(),
        Some("Your parcel left yesterday.")
    );
    let supervisor = ctx.trace_for(AgentId::Supervisor, true).unwrap();
    assert_eq!(supervisor, shown);
    assert!(ctx.trace_for(AgentId::Troubleshoot, true).is_none());

    assert_eq!(ctx.state(), LifecycleState::Freezing);
    let events = drain(&rx);
    assert_eq!(
        count(
            &events,
            &FlowEvent::FinalMessageDetected {
                preserve_trace_data: true
            }
        ),
        1
    );
    assert!(events.contains(&FlowEvent::NodeProcessingStateChanged {
        node: AgentId::OrderManagement,
        is_processing: false,
        processing_complete: true,
    }));
}

#[test]
fn test_double_stop_is_harmless() {
    let mut ctx = context();
    let rx = ctx.subscribe_channel();
    let supervisor = Payload::agent("Supervisor", "s1");
    ctx.ingest(&supervisor.final_response("done"), "conn", at(10));
    assert_eq!(ctx.state(), LifecycleState::Freezing);

    assert!(ctx.stop(at(20)));
    assert!(!ctx.stop(at(30)));
    assert!(!ctx.freeze(at(40)));

    assert_eq!(ctx.state(), LifecycleState::Stopped);
    assert!(ctx.timers().is_empty());
    assert!(ctx.timers().is_locked());
    let events = drain(&rx);
    assert_eq!(count(&events, &FlowEvent::AllProcessingKilled), 1);
    assert_eq!(count(&events, &FlowEvent::FlowAnimationsFrozen(true)), 1);
}

#[test]
fn test_final_rendered_stops_after_grace() {
    let mut ctx = context();
    let supervisor = Payload::agent("Supervisor", "s1");
    ctx.ingest(&supervisor.final_response("done"), "conn", at(0));

    assert!(ctx.notify_final_rendered(at(1_000)));
    assert!(!ctx.notify_final_rendered(at(1_010)));
    ctx.tick(at(1_050));
    assert_eq!(ctx.state(), LifecycleState::Freezing);

    let fired = ctx.tick(at(1_100));
    assert!(fired.contains(&TimerAction::StopAfterGrace));
    assert_eq!(ctx.state(), LifecycleState::Stopped);

    // Payloads after the stop are dropped.
    let before = ctx.trace_for(AgentId::Supervisor, true);
    assert!(ctx
        .ingest(&supervisor.model_input("late"), "conn", at(2_000))
        .is_none());
    assert_eq!(ctx.trace_for(AgentId::Supervisor, true), before);
}

#[test]
fn test_freeze_has_hard_ceiling() {
    let mut ctx = context();
    let supervisor = Payload::agent("Supervisor", "s1");
    ctx.ingest(&supervisor.final_response("done"), "conn", at(0));

    ctx.tick(at(9_999));
    assert_eq!(ctx.state(), LifecycleState::Freezing);
    let fired = ctx.tick(at(10_000));
    assert!(fired.contains(&TimerAction::HardStop));
    assert_eq!(ctx.state(), LifecycleState::Stopped);
}

#[test]
fn test_idle_timeout_stops_armed_context() {
    let mut ctx = context();
    let fired = ctx.tick(at(5 * 60 * 1000));
    assert!(fired.contains(&TimerAction::IdleStop));
    assert_eq!(ctx.state(), LifecycleState::Stopped);
}

#[test]
fn test_activity_postpones_idle_timeout() {
    let mut ctx = context();
    let agent = Payload::agent("Troubleshoot", "s1");
    ctx.ingest(&agent.model_input("router keeps dropping"), "conn", at(200_000));

    ctx.tick(at(300_000));
    assert_eq!(ctx.state(), LifecycleState::Armed);
    ctx.tick(at(500_000));
    assert_eq!(ctx.state(), LifecycleState::Stopped);
}

#[test]
fn test_new_user_message_resets_previous_turn() {
    let mut ctx = context();
    let rx = ctx.subscribe_channel();
    let old = Payload::agent("Supervisor", "s-old");
    ctx.ingest(&old.model_input("q"), "conn", at(0));
    ctx.ingest(&old.final_response("old answer"), "conn", at(100));
    ctx.notify_final_rendered(at(200));
    ctx.tick(at(300));
    assert_eq!(ctx.state(), LifecycleState::Stopped);
    drain(&rx);

    let change = ctx.ingest_user_message("and my refund?", Some("s-new"), at(5_000));
    assert!(change.is_some());
    assert_eq!(ctx.state(), LifecycleState::Armed);
    assert!(!ctx.timers().is_locked());

    let events = drain(&rx);
    assert_eq!(count(&events, &FlowEvent::SessionReset), 1);
    assert_eq!(count(&events, &FlowEvent::FlowAnimationsFrozen(false)), 1);

    assert!(ctx.trace_for(AgentId::Supervisor, true).is_none());
    let message = ctx.trace_for(AgentId::Customer, true).unwrap();
    assert!(message.is_user_message());
    assert_eq!(message.session_id.as_deref(), Some("s-new"));
    assert!(ctx.group("s-old").is_none());

    assert!(ctx.recover_previous_session());
    let recovered = ctx.trace_for(AgentId::Supervisor, true).unwrap();
    assert_eq!(recovered.final_response.as_deref(), Some("old answer"));
    assert!(!ctx.recover_previous_session());
}

#[test]
fn test_polling_publishes_changes_and_gives_up() {
    let mut ctx = context();
    let rx = ctx.subscribe_channel();
    let agent = Payload::agent("Personalization", "s1");
    ctx.ingest(&agent.model_input("my preferences"), "conn", at(100));
    drain(&rx);

    ctx.tick(at(500));
    let events = drain(&rx);
    assert!(events.contains(&FlowEvent::NodeProcessingStateChanged {
        node: AgentId::Personalization,
        is_processing: true,
        processing_complete: false,
    }));

    ctx.tick(at(1_000));
    assert!(drain(&rx).is_empty());

    ctx.tick(at(31_000));
    assert!(!ctx.timers().is_scheduled(TimerAction::PollChanges));

    ctx.ingest(&agent.model_output("noted"), "conn", at(32_000));
    assert!(ctx.timers().is_scheduled(TimerAction::PollChanges));
}

#[test]
fn test_router_handlers_see_raw_messages() {
    let mut ctx = context();
    let seen = Rc::new(Cell::new(0));
    let sink = Rc::clone(&seen);
    ctx.register("s1", MessageType::ChatUpdate, move |_| sink.set(sink.get() + 1));

    let trace = Payload::agent("Supervisor", "s1").model_input("hi");
    ctx.handle_message("s1", &chat_update_envelope(&trace), at(0));
    ctx.handle_message("s2", &chat_update_envelope(&trace), at(1));
    assert_eq!(seen.get(), 1);

    assert_eq!(ctx.unregister("s1", MessageType::ChatUpdate), 1);
    ctx.handle_message("s1", &chat_update_envelope(&trace), at(2));
    assert_eq!(seen.get(), 1);
}

#[test]
fn test_response_complete_flag_freezes() {
    let mut ctx = context();
    let raw = serde_json::json!({
        "type": "chat-update",
        "onUpdateChat": { "responseComplete": true }
    });
    assert!(ctx.handle_message("s1", &raw, at(0)).is_none());
    assert_eq!(ctx.state(), LifecycleState::Freezing);
}

#[test]
fn test_sqlite_cache_survives_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = TraceflowConfig::default();
    config.cache_path = Some(dir.path().join("traces.db"));
    config.store.clear_on_init = false;

    {
        let mut ctx = ProcessContext::init(config.clone(), at(0)).unwrap();
        let agent = Payload::agent("ProductRecommendation", "s1");
        ctx.ingest(&agent.kb_query("tents"), "conn", at(10));
    }

    let mut ctx = ProcessContext::init(config, at(1_000)).unwrap();
    let restored = ctx.display_trace(AgentId::ProductRecommendation).unwrap();
    assert_eq!(restored.step_count(), 1);
}

#[test]
fn test_dispose_disconnects_everything() {
    let mut ctx = context();
    let rx = ctx.subscribe_channel();
    ctx.dispose();
    ctx.dispose();

    let trace = Payload::agent("Supervisor", "s1").model_input("hi");
    assert!(ctx.ingest(&trace, "conn", at(1)).is_none());
    assert!(ctx.tick(at(10_000_000)).is_empty());
    assert!(ctx.timers().is_empty());
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
}
