//! Integration tests for rfstream-core.
//!
//! Drives the step engine end to end through its command ring: deterministic
//! output, ramp convergence, start-trigger gating, channel lifecycle, phase
//! wrapping, underflow accounting, and the threaded stream with end triggers.

use std::time::{Duration, Instant};

use rfstream_core::{
    Command, CommandWriter, GeneratorRegistry, MAX_PHASE, Ramp, StepEngine, StepOutput, Stream,
    StreamConfig, decode_log, encode_log, wrap_phase,
};

fn config() -> StreamConfig {
    StreamConfig {
        max_channels: 8,
        command_capacity: 256,
        ..StreamConfig::default()
    }
}

fn send(writer: &mut CommandWriter, cmds: &[Command]) {
    assert_eq!(writer.write_commands(cmds), cmds.len());
    writer.flush();
}

fn render(cmds: &[Command], steps: usize) -> Vec<StepOutput> {
    let (mut writer, mut engine) = StepEngine::offline(&config());
    send(&mut writer, cmds);
    let mut out = StepOutput::default();
    (0..steps)
        .map(|_| {
            engine.step(&mut out);
            out
        })
        .collect()
}

/// A two-channel program with a set, a scalar ramp, and a table ramp.
fn program() -> Vec<Command> {
    vec![
        Command::channel_add(0),
        Command::channel_add(0),
        Command::amplitude_set(0, 0, i32::MAX / 4),
        Command::frequency_set(0, 0, 5_000_000),
        Command::amplitude_ramp(0, 1, i32::MAX / 3, 20, Ramp::linear(0, i32::MAX / 3, 20))
            .unwrap(),
        Command::frequency_vector_ramp(
            0,
            1,
            4_000_000,
            4,
            vec![0, 1_000_000, 2_000_000, 3_000_000, 4_000_000],
        )
        .unwrap(),
        Command::phase(10, 0, 1_000_000_000),
    ]
}

// ============================================================================
// 1. Determinism
// ============================================================================

#[test]
fn identical_commands_render_identical_output() {
    let a = render(&program(), 40);
    let b = render(&program(), 40);
    assert_eq!(a, b);
    assert!(a.iter().any(|o| !o.is_silent()));
}

#[test]
fn repeated_set_is_idempotent() {
    let base = [
        Command::channel_add(0),
        Command::frequency_set(0, 0, 3_000_000),
    ];
    let mut once = base.to_vec();
    once.push(Command::amplitude_set(0, 0, 1 << 28));
    let mut twice = once.clone();
    twice.push(Command::amplitude_set(0, 0, 1 << 28));

    assert_eq!(render(&once, 10), render(&twice, 10));
}

#[test]
fn device_samples_stay_in_range() {
    let cmds = [
        Command::channel_add(0),
        Command::channel_add(0),
        Command::channel_add(0),
        Command::amplitude_set(0, 0, i32::MAX),
        Command::amplitude_set(0, 1, i32::MAX),
        Command::amplitude_set(0, 2, i32::MAX),
        Command::frequency_set(0, 0, 10_000_000),
        Command::frequency_set(0, 1, 10_000_000),
        Command::frequency_set(0, 2, 10_000_000),
    ];
    for out in render(&cmds, 16) {
        assert!(out.to_i16().iter().all(|s| (-32767..=32767).contains(s)));
    }
}

// ============================================================================
// 2. Ramps
// ============================================================================

#[test]
fn frequency_ramp_converges_and_drives_phase() {
    let ramp = Command::frequency_ramp(0, 0, 320, 4, Ramp::linear(0, 320, 4)).unwrap();
    let (mut writer, mut engine) = StepEngine::offline(&config());
    send(&mut writer, &[Command::channel_add(0), ramp]);

    let mut out = StepOutput::default();
    for _ in 0..5 {
        engine.step(&mut out);
    }
    let ch = engine.channels()[0];
    assert_eq!(ch.frequency, 320);
    // 32 * f + 16 * df per step: four ramp steps, then one at the final value.
    assert_eq!(ch.phase, 1_280 + 3_840 + 6_400 + 8_960 + 10_240);
    assert_eq!(engine.active_ramps(), 0);
}

#[test]
fn vector_ramp_holds_last_value() {
    let ramp = Command::amplitude_vector_ramp(0, 0, 7, 3, vec![1, 3, 5, 7]).unwrap();
    let outs = render(&[Command::channel_add(0), ramp], 6);
    let first: Vec<i64> = outs.iter().map(|o| o.amplitude[0]).collect();
    assert_eq!(first, [1, 3, 5, 7, 7, 7]);
}

#[test]
fn newer_ramp_replaces_running_one() {
    let slow = Command::amplitude_ramp(0, 0, 1000, 100, Ramp::linear(0, 1000, 100)).unwrap();
    let fast = Command::amplitude_ramp(2, 0, 50, 2, Ramp::linear(20, 50, 2)).unwrap();
    let outs = render(&[Command::channel_add(0), slow, fast], 6);
    assert_eq!(outs[1].amplitude[0], 10);
    assert_eq!(outs[2].amplitude[0], 20);
    assert_eq!(outs[5].amplitude[0], 50);
}

// ============================================================================
// 3. Start trigger gating
// ============================================================================

#[test]
fn start_trigger_holds_output_until_published_time() {
    let (mut writer, mut engine) = StepEngine::offline(&config());
    let trigger = std::sync::Arc::clone(engine.trigger());
    let id = trigger.allocate_start_trigger_id();
    send(
        &mut writer,
        &[
            Command::trigger_start(0, id),
            Command::channel_add(0),
            Command::amplitude_set(0, 0, i32::MAX / 2),
            Command::frequency_set(0, 0, 10_000_000),
        ],
    );

    let mut out = StepOutput::default();
    for _ in 0..3 {
        assert!(!engine.step(&mut out));
        assert!(out.is_silent());
        assert!(trigger.is_in_slow_mode());
    }
    assert_eq!(engine.current_time(), 0);

    // Ten steps of 51.2 ns each.
    trigger.publish_start_trigger(id, 512);
    let mut held = 3;
    while !engine.step(&mut out) {
        held += 1;
        assert!(held < 20, "start trigger never released");
    }
    assert_eq!(held, 10);
    assert!(!out.is_silent());
    assert!(!trigger.is_in_slow_mode());
    assert_eq!(engine.current_time(), 1);
    assert_eq!(engine.step_count(), 11);
}

#[test]
fn time_offset_brings_trigger_forward() {
    let cfg = StreamConfig {
        time_offset: 1_000,
        ..config()
    };
    let (mut writer, mut engine) = StepEngine::offline(&cfg);
    let id = engine.trigger().allocate_start_trigger_id();
    engine.trigger().publish_start_trigger(id, 1_000);
    send(&mut writer, &[Command::trigger_start(0, id)]);

    let mut out = StepOutput::default();
    assert!(engine.step(&mut out));
}

// ============================================================================
// 4. Channel lifecycle
// ============================================================================

#[test]
fn removal_moves_last_channel_into_slot() {
    let (mut writer, mut engine) = StepEngine::offline(&config());
    send(
        &mut writer,
        &[
            Command::channel_add(0),
            Command::channel_add(0),
            Command::channel_add(0),
            Command::amplitude_set(0, 0, 10),
            Command::amplitude_set(0, 1, 20),
            Command::amplitude_set(0, 2, 30),
            Command::channel_remove(1, 1),
        ],
    );
    let mut out = StepOutput::default();
    engine.step(&mut out);
    assert_eq!(out.amplitude[0], 60);
    engine.step(&mut out);

    let amps: Vec<i32> = engine.channels().iter().map(|c| c.amplitude).collect();
    assert_eq!(amps, [10, 30]);
    assert_eq!(out.amplitude[0], 40);
}

#[test]
fn moved_channel_keeps_its_ramp() {
    let ramp = Command::amplitude_ramp(0, 1, 400, 4, Ramp::linear(0, 400, 4)).unwrap();
    let outs = render(
        &[
            Command::channel_add(0),
            Command::channel_add(0),
            ramp,
            Command::channel_remove(2, 0),
        ],
        5,
    );
    assert_eq!(outs[2].amplitude[0], 200);
    assert_eq!(outs[4].amplitude[0], 400);
}

// ============================================================================
// 5. Phase wrapping
// ============================================================================

#[test]
fn phase_wraps_past_one_cycle() {
    let (mut writer, mut engine) = StepEngine::offline(&config());
    send(
        &mut writer,
        &[
            Command::channel_add(0),
            Command::frequency_set(0, 0, 200_000_000),
        ],
    );
    let mut out = StepOutput::default();
    engine.step(&mut out);
    assert_eq!(engine.channels()[0].phase, 32 * 200_000_000 - MAX_PHASE);
}

#[test]
fn wrap_boundaries() {
    assert_eq!(wrap_phase(MAX_PHASE), MAX_PHASE);
    assert_eq!(wrap_phase(-MAX_PHASE), -MAX_PHASE);
    assert_eq!(wrap_phase(MAX_PHASE + 1), 1);
    assert_eq!(wrap_phase(-MAX_PHASE - 1), MAX_PHASE - 1);
}

// ============================================================================
// 6. Underflow accounting
// ============================================================================

#[test]
fn late_batch_counts_one_underflow() {
    let (mut writer, mut engine) = StepEngine::offline(&config());
    let mut out = StepOutput::default();
    for _ in 0..5 {
        engine.step(&mut out);
    }
    send(
        &mut writer,
        &[
            Command::channel_add(1),
            Command::channel_add(2),
            Command::channel_add(3),
        ],
    );
    engine.step(&mut out);
    assert_eq!(engine.channels().len(), 3);
    assert_eq!(engine.diagnostics().command_underflow(), 1);

    // Time-0 commands are setup, not late.
    send(&mut writer, &[Command::channel_add(0)]);
    engine.step(&mut out);
    assert_eq!(engine.channels().len(), 4);
    assert_eq!(engine.diagnostics().command_underflow(), 1);
}

// ============================================================================
// 7. Wire format
// ============================================================================

#[test]
fn command_log_replays_to_same_output() {
    let mut registry = GeneratorRegistry::new();
    let records: Vec<_> = program()
        .iter()
        .map(|c| registry.encode(c).unwrap())
        .collect();
    let bytes = encode_log(&records);
    assert_eq!(bytes.len(), records.len() * 20);

    let replayed: Vec<Command> = decode_log(&bytes)
        .unwrap()
        .iter()
        .map(|r| registry.decode(r).unwrap())
        .collect();
    assert_eq!(render(&replayed, 30), render(&program(), 30));
}

// ============================================================================
// 8. Threaded stream
// ============================================================================

fn stream_config() -> StreamConfig {
    StreamConfig {
        max_channels: 4,
        command_capacity: 64,
        output_capacity: 4096,
        steps_per_page: 4,
        ..StreamConfig::default()
    }
}

#[test]
fn stream_produces_carrier_samples() {
    let mut stream = Stream::new(stream_config());
    stream.write_commands(&[
        Command::channel_add(0),
        Command::amplitude_set(0, 0, i32::MAX / 2),
        Command::frequency_set(0, 0, 10_000_000),
    ]);
    stream.flush();
    stream.start_worker().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut peak = 0i16;
    let mut seen = 0usize;
    while seen < 2048 && Instant::now() < deadline {
        let ready = stream.borrow_ready_samples();
        peak = ready.iter().fold(peak, |p, s| p.max(s.saturating_abs()));
        let n = ready.len();
        stream.release_samples(n);
        seen += n;
    }
    stream.stop_worker().unwrap();

    assert!(seen >= 2048);
    assert!(peak > 1000, "peak {peak}");
    assert_eq!(stream.command_underflow(), 0);
    assert_eq!(stream.malformed_commands(), 0);
}

#[test]
fn end_trigger_fires_once_samples_are_released() {
    let mut stream = Stream::new(stream_config());
    let id = stream.allocate_end_trigger_id();
    stream.add_command(Command::trigger_end(0, id));
    stream.flush();
    stream.start_worker().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while stream.triggered_end_id() != id && Instant::now() < deadline {
        let n = stream.borrow_ready_samples().len();
        stream.release_samples(n);
        std::thread::yield_now();
    }
    stream.stop_worker().unwrap();

    assert_eq!(stream.triggered_end_id(), id);
    assert_eq!(stream.end_trigger_position(), None);
}

#[test]
fn split_handles_work_from_two_threads() {
    let mut stream = Stream::start(stream_config()).unwrap();
    let (writer, reader) = stream.split();

    std::thread::scope(|s| {
        s.spawn(|| {
            for ch in 0..4 {
                writer.add_command(Command::channel_add(0));
                writer.add_command(Command::amplitude_set(0, ch, 1 << 20));
            }
            writer.flush();
        });
        s.spawn(|| {
            let mut seen = 0;
            while seen < 4096 {
                let n = reader.borrow_ready_samples().len();
                reader.release_samples(n);
                seen += n;
                std::thread::yield_now();
            }
        });
    });

    stream.stop_worker().unwrap();
    assert_eq!(stream.malformed_commands(), 0);
}
