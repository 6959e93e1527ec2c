//! End-to-end coordination tests: frames in, commands out, through the
//! full loop of one anchor node.

use ostrvo_core::{
    wire, ChannelTransport, Coordinator, CoordinatorConfig, EnginePhase, Energy, FixedTelemetry,
    Health, LocalSample, NodeRole, Power, Relay, RelayBank, RelayClass, RelayKind, RosterEntry,
    ShedAction, ShedCommand, TelemetryReport, WireMessage,
};

fn street_config() -> CoordinatorConfig {
    CoordinatorConfig {
        roster: vec![
            RosterEntry {
                id: "a1".to_string(),
                role: NodeRole::Anchor,
                priority_tier: 1,
                battery_capacity_kwh: Energy::from_kwh(20.0),
                max_charge_rate_kw: Power::from_kw(5.0),
                max_load_kw: Power::from_kw(10.0),
                max_generation_kw: Power::from_kw(8.0),
            },
            RosterEntry {
                id: "p1".to_string(),
                role: NodeRole::Participant,
                priority_tier: 1,
                battery_capacity_kwh: Energy::from_kwh(10.0),
                max_charge_rate_kw: Power::from_kw(3.0),
                max_load_kw: Power::from_kw(8.0),
                max_generation_kw: Power::from_kw(4.0),
            },
            RosterEntry {
                id: "p2".to_string(),
                role: NodeRole::Participant,
                priority_tier: 2,
                battery_capacity_kwh: Energy::from_kwh(10.0),
                max_charge_rate_kw: Power::from_kw(3.0),
                max_load_kw: Power::from_kw(8.0),
                max_generation_kw: Power::from_kw(4.0),
            },
        ],
        ..CoordinatorConfig::default()
    }
}

fn anchor_node(
    generation_kw: f64,
) -> Coordinator<ChannelTransport, FixedTelemetry, RelayBank> {
    Coordinator::new(
        "a1".to_string(),
        street_config(),
        ChannelTransport::new(),
        FixedTelemetry(LocalSample {
            battery_kwh: Energy::from_kwh(15.0),
            load_kw: Power::ZERO,
            generation_kw: Power::from_kw(generation_kw),
        }),
        RelayBank::new(vec![Relay {
            id: "r_inv".to_string(),
            name: "Inverter Output".to_string(),
            kind: RelayKind::Source,
            class: RelayClass::Critical,
            is_closed: true,
        }]),
    )
    .unwrap()
}

fn report_frame(id: &str, seq: u32, tick: u32, battery: f64, load: f64) -> Vec<u8> {
    wire::encode(&WireMessage::StateReport(TelemetryReport {
        node_id: id.to_string(),
        tick,
        seq,
        battery_kwh: Energy::from_kwh(battery),
        load_kw: Power::from_kw(load),
        generation_kw: Power::ZERO,
    }))
    .unwrap()
}

/// Collect every shed command the anchor broadcast this tick
fn sent_commands(
    node: &mut Coordinator<ChannelTransport, FixedTelemetry, RelayBank>,
) -> Vec<ShedCommand> {
    node.transport_mut()
        .drain_outbound()
        .iter()
        .filter_map(|frame| match wire::decode(frame) {
            Ok(WireMessage::ShedCommand(cmd)) => Some(cmd),
            _ => None,
        })
        .collect()
}

#[test]
fn sustained_deficit_sheds_tier_one_only() {
    // The worked street: 5 kW of anchor generation, two participants
    // drawing 3 kW each. The deficit must shed p1 (tier 1) and spare p2.
    let mut anchor = anchor_node(5.0);
    let mut commands = Vec::new();

    for tick in 0..20u32 {
        let seq = tick + 1;
        anchor
            .transport_mut()
            .push_inbound(report_frame("p1", seq, tick, 4.0, 3.0));
        anchor
            .transport_mut()
            .push_inbound(report_frame("p2", seq, tick, 5.0, 3.0));
        anchor.run_tick();
        commands.extend(sent_commands(&mut anchor));
    }

    assert!(!commands.is_empty(), "deficit never produced a shed command");
    assert!(commands.iter().all(|c| c.action == ShedAction::Shed));
    assert!(commands.iter().all(|c| c.target == "p1"), "p2 must be spared: {commands:?}");
    assert!(anchor.registry().get("p1").unwrap().shed_commanded);
    assert!(!anchor.registry().get("p2").unwrap().shed_commanded);
}

#[test]
fn deep_deficit_walks_up_the_tiers() {
    // Only 2 kW of generation: shedding tier 1 is not enough
    let mut anchor = anchor_node(2.0);
    let mut commands = Vec::new();

    for tick in 0..20u32 {
        let seq = tick + 1;
        anchor
            .transport_mut()
            .push_inbound(report_frame("p1", seq, tick, 4.0, 3.0));
        anchor
            .transport_mut()
            .push_inbound(report_frame("p2", seq, tick, 5.0, 3.0));
        anchor.run_tick();
        commands.extend(sent_commands(&mut anchor));
    }

    let targets: Vec<&str> = commands.iter().map(|c| c.target.as_str()).collect();
    assert_eq!(targets, vec!["p1", "p2"], "tiers must shed in order across evaluations");
    assert!(commands[1].issued_tick > commands[0].issued_tick);
}

#[test]
fn replayed_frames_never_reapply() {
    let mut anchor = anchor_node(5.0);
    let frame = report_frame("p1", 1, 0, 4.0, 3.0);
    anchor.transport_mut().push_inbound(frame.clone());
    anchor.run_tick();
    assert_eq!(anchor.counters().rejected_reports, 0);

    // The radio duplicates and an attacker replays: same sequence again
    anchor.transport_mut().push_inbound(frame.clone());
    anchor.transport_mut().push_inbound(frame);
    anchor.run_tick();
    assert_eq!(anchor.counters().rejected_reports, 2);
    assert_eq!(anchor.registry().get("p1").unwrap().last_seq, Some(1));
}

#[test]
fn corrupt_frames_drop_without_breaking_the_tick() {
    let mut anchor = anchor_node(5.0);
    let good = report_frame("p1", 1, 0, 4.0, 3.0);
    let mut bad = good.clone();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;
    anchor.transport_mut().push_inbound(vec![0x00, 0x01, 0x02]);
    anchor.transport_mut().push_inbound(bad);
    anchor.transport_mut().push_inbound(good);

    let summary = anchor.run_tick();
    assert_eq!(anchor.counters().decode_failures, 2);
    // The valid report in the same batch still landed
    assert!(anchor.registry().get("p1").unwrap().latest.is_some());
    assert_eq!(summary.snapshot.total_load_kw, Power::from_kw(3.0));
}

#[test]
fn lying_battery_degrades_to_faulty_and_loses_its_reserve_vote() {
    let mut anchor = anchor_node(5.0);
    let cfg = street_config();

    // p2 first reports a plausible baseline, then claims impossible
    // battery jumps every tick
    anchor
        .transport_mut()
        .push_inbound(report_frame("p2", 1, 0, 2.0, 1.0));
    anchor.run_tick();

    let threshold = cfg.consecutive_anomaly_threshold;
    for i in 0..threshold {
        let tick = i + 1;
        let battery = 9.0 + f64::from(i); // far past any charge rate
        anchor
            .transport_mut()
            .push_inbound(report_frame("p2", i + 2, tick, battery, 1.0));
        let summary = anchor.run_tick();
        // Untrusted reserve claims never reach the aggregate
        assert!(summary.snapshot.total_reserve_kwh <= Energy::from_kwh(17.0));
    }

    let record = anchor.registry().get("p2").unwrap();
    assert_eq!(record.health, Health::Faulty);
    // Its last plausible load is still counted, fail conservative
    assert_eq!(record.last_known_load(), Power::from_kw(1.0));
}

#[test]
fn recovery_follows_hysteresis_and_restores_everyone() {
    let mut anchor = anchor_node(2.0);
    let mut tick = 0u32;

    // Phase one: deficit until both participants are shed
    for _ in 0..20 {
        let seq = tick + 1;
        anchor
            .transport_mut()
            .push_inbound(report_frame("p1", seq, tick, 4.0, 3.0));
        anchor
            .transport_mut()
            .push_inbound(report_frame("p2", seq, tick, 5.0, 3.0));
        anchor.run_tick();
        sent_commands(&mut anchor);
        tick += 1;
    }
    assert!(anchor.registry().get("p1").unwrap().shed_commanded);
    assert!(anchor.registry().get("p2").unwrap().shed_commanded);

    // Phase two: shed participants report their loads actually gone;
    // sustained surplus must restore tier 2 before tier 1
    let mut restores = Vec::new();
    for _ in 0..30 {
        let seq = tick + 1;
        anchor
            .transport_mut()
            .push_inbound(report_frame("p1", seq, tick, 4.0, 0.0));
        anchor
            .transport_mut()
            .push_inbound(report_frame("p2", seq, tick, 5.0, 0.0));
        anchor.run_tick();
        restores.extend(
            sent_commands(&mut anchor)
                .into_iter()
                .filter(|c| c.action == ShedAction::Restore),
        );
        tick += 1;
    }

    let targets: Vec<&str> = restores.iter().map(|c| c.target.as_str()).collect();
    assert_eq!(targets, vec!["p2", "p1"]);
    assert_eq!(anchor.phase(), EnginePhase::Normal);
    assert!(!anchor.registry().get("p1").unwrap().shed_commanded);
}
