//! Display the fixed-point units and the command record layout.

use rfstream_core::{
    ADD_CHANNEL, AMP_FACTOR, AMP_SCALE, FREQ_SCALE, MAX_PHASE, PHASE_SCALE, RECORD_SIZE,
    SAMPLE_RATE, SAMPLES_PER_STEP, SUBGROUP_LEN,
};

/// Run the info command.
pub fn run() -> anyhow::Result<()> {
    println!("Timing");
    println!("  Sample rate:      {SAMPLE_RATE} S/s");
    println!("  Samples per step: {SAMPLES_PER_STEP} ({SUBGROUP_LEN} per sub-group)");
    println!(
        "  Step duration:    {:.1} ns",
        SAMPLES_PER_STEP as f64 * 1e9 / SAMPLE_RATE as f64
    );
    println!();
    println!("Units");
    println!("  MAX_PHASE:   {MAX_PHASE} per cycle");
    println!("  PHASE_SCALE: {PHASE_SCALE:e}");
    println!("  FREQ_SCALE:  {FREQ_SCALE:e} (frequency unit: 0.1 Hz)");
    println!("  AMP_SCALE:   {AMP_SCALE:e}");
    println!("  AMP_FACTOR:  {AMP_FACTOR:e}");
    println!();
    println!("Command record ({RECORD_SIZE} bytes, little-endian)");
    println!("  0..4    u32  time (steps)");
    println!("  4..8    u32  opcode (low 4 bits) | channel (high 28 bits)");
    println!("  8..12   i32  final value / trigger id");
    println!("  12..16  f32  ramp duration (steps)");
    println!("  16..20  u32  ramp generator handle (0 = none)");
    println!("  ADD_CHANNEL = {ADD_CHANNEL:#x}");
    Ok(())
}
