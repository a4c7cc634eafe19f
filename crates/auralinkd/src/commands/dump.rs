//! `auralinkd dump`: print a point-in-time engine state snapshot.
//!
//! The real control-socket `IODEV_LIST`/dump round trip to an already
//! running server is out of scope per spec.md §1 (the control-socket
//! protocol body is an external collaborator); this command instead spins
//! up the same [`AudioThread`] the `run` subcommand drives, ticks it once,
//! and prints the resulting [`EngineSnapshot`] — enough to see the
//! scheduler's own dump machinery (`EngineRequest::Dump` /
//! `EngineReply::Dump`) exercised end to end.

use clap::Args;

use auralink_engine::{AudioThread, EngineReply, EngineRequest, EngineSnapshot};
use auralink_shm::backing::InMemoryBacking;

#[derive(Args)]
pub struct DumpArgs {}

pub fn run(_args: DumpArgs) -> anyhow::Result<()> {
    let (req_tx, req_rx) = crossbeam_channel::unbounded();
    let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
    let (event_tx, _event_rx) = crossbeam_channel::unbounded();

    let mut engine: AudioThread<InMemoryBacking> = AudioThread::new(req_rx, reply_tx, event_tx);

    req_tx.send(EngineRequest::Dump)?;
    engine.tick();

    match reply_rx.try_recv() {
        Ok(EngineReply::Dump(snapshot)) => print_snapshot(&snapshot),
        Ok(other) => println!("unexpected engine reply: {other:?}"),
        Err(err) => println!("no reply from engine: {err}"),
    }

    Ok(())
}

fn print_snapshot(snapshot: &EngineSnapshot) {
    println!("Engine snapshot");
    println!("===============\n");
    println!("Devices:");
    for device in &snapshot.devices {
        println!(
            "  [{}] direction={:?} state={:?} fallback={} streams={:?}",
            device.id.0, device.direction, device.state, device.is_fallback, device.attached_streams
        );
    }
    println!("\nStreams:");
    if snapshot.streams.is_empty() {
        println!("  (none attached)");
    }
    for stream in &snapshot.streams {
        println!(
            "  [{:?}] conn_state={:?} cb_timeouts={}",
            stream.id, stream.conn_state, stream.num_cb_timeouts
        );
    }
}
