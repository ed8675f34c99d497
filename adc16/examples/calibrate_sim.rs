//! In this example, we calibrate the ADCs of a simulated SNAP that has a couple of awkward lanes,
//! then print what the calibration found.

use adc16::prelude::*;
use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // A board with a narrow eye on one lane and some misframed ones
    let board = SimBoard::new()
        .with_eye(Chip::A, "2b".parse()?, 3..=11)
        .with_eye(Chip::C, "4a".parse()?, 20..=31)
        .with_framing(Chip::A, "1a".parse()?, 5)
        .with_framing(Chip::B, "3b".parse()?, 2);
    let transport = Arc::new(Mutex::new(board));

    // No need to wait for patterns to settle in simulation
    let config = CalibrationConfig::builder()
        .settle(Duration::ZERO)
        .demux(DemuxMode::By1)
        .report_board_clock(true)
        .build()?;

    let mut calibration = Calibration::new(&transport, config)?;
    let report = calibration.run()?;

    println!("Clock locked - {}", report.clock_locked);
    if let Some(mhz) = report.board_clock_mhz {
        println!("FPGA clock - {mhz:.1} MHz");
    }
    for chip in &report.chips {
        println!("Chip {} tap sweep\n{}", chip.chip, chip.errors);
        for (channel, selection) in &chip.taps {
            println!(
                "  {channel}: tap {} of {} good, {} bitslips",
                selection.tap,
                selection.good_taps.len(),
                chip.bitslip.slips[channel.index()]
            );
        }
    }
    println!("Final state - {}", calibration.state());
    Ok(())
}
