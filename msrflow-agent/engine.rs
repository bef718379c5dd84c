//! Timed scheduling engine.
//!
//! Turns the parsed command table into a live periodic I/O loop: each tick
//! it issues one batched backend call per due command across the whole core
//! set, prints a sample line for the commands that asked for one, computes
//! the next wake time, and sleeps. The loop ends when no command remains
//! schedulable or when the cancellation token is set.
//!
//! The engine never touches hardware itself; everything goes through the
//! bound [`Backend`]. That is what keeps it identical across host
//! environments.

use std::io::{self, Write};

use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::command::{Base, Command};
use msrflow_abi::{Backend, CoreId, MsrAddr, MsrVal};

/// Longest single blocking sleep. Long periods are sliced so a stop request
/// is observed within this bound instead of after a full period.
const SLEEP_SLICE_MS: u64 = 200;

/// Per-run mutable schedule state, discarded when the run ends.
struct Schedule {
    /// Absolute next fire time per command; `None` means retired.
    next_fire: Vec<Option<u64>>,
    /// Row-major (command x core) value buffer. Rows of write commands hold
    /// the configured value right before a backend call and the prior
    /// register content right after.
    values: Vec<MsrVal>,
    /// Row-major replicated addresses, filled once and never mutated. Kept
    /// per core so the backend always sees parallel arrays.
    addresses: Vec<MsrAddr>,
    /// Whether the command's batch call failed for at least one core this
    /// tick. A failed row is all-or-nothing: zeroed and shown as "no data".
    failed: Vec<bool>,
    /// Cores per row.
    width: usize,
}

impl Schedule {
    fn new(commands: &[Command], width: usize, start: u64) -> Self {
        let mut schedule = Schedule {
            next_fire: commands
                .iter()
                .map(|c| Some(start + c.delay))
                .collect(),
            values: vec![0; commands.len() * width],
            addresses: commands
                .iter()
                .flat_map(|c| std::iter::repeat(c.address).take(width))
                .collect(),
            failed: vec![false; commands.len()],
            width,
        };
        schedule.reprime(commands);
        schedule
    }

    fn is_due(&self, index: usize, now: u64) -> bool {
        matches!(self.next_fire[index], Some(t) if t <= now)
    }

    fn row(&self, index: usize) -> &[MsrVal] {
        &self.values[index * self.width..(index + 1) * self.width]
    }

    fn row_mut(&mut self, index: usize) -> (&[MsrAddr], &mut [MsrVal]) {
        let span = index * self.width..(index + 1) * self.width;
        (&self.addresses[span.clone()], &mut self.values[span])
    }

    /// Retire or step every command that fired this tick and return the
    /// earliest remaining fire time, `None` when the schedule is exhausted.
    ///
    /// Repeating commands catch up: the period is added until the fire time
    /// passes `now`, so a stalled tick resumes at the next future boundary
    /// instead of replaying every missed one.
    fn advance(&mut self, commands: &[Command], now: u64) -> Option<u64> {
        let mut nearest: Option<u64> = None;

        for (index, command) in commands.iter().enumerate() {
            let Some(mut fire) = self.next_fire[index] else {
                continue;
            };

            if fire <= now {
                match command.repeat {
                    Some(period) if period > 0 => {
                        while fire <= now {
                            fire += period;
                        }
                        self.next_fire[index] = Some(fire);
                    }
                    // A zero period would spin; retire it like a one-shot.
                    _ => {
                        self.next_fire[index] = None;
                        continue;
                    }
                }
            }

            nearest = Some(nearest.map_or(fire, |n| n.min(fire)));
        }

        nearest
    }

    /// Restore the configured value in every write row, undoing the
    /// read-and-swap of the last fire so the next one writes the intended
    /// value rather than the register's prior content.
    fn reprime(&mut self, commands: &[Command]) {
        for (index, command) in commands.iter().enumerate() {
            if let Some(value) = command.write {
                self.values[index * self.width..(index + 1) * self.width].fill(value);
            }
        }
    }
}

pub struct Engine<'a> {
    clock: &'a dyn Clock,
    cancel: CancellationToken,
}

impl<'a> Engine<'a> {
    pub fn new(clock: &'a dyn Clock, cancel: CancellationToken) -> Self {
        Engine { clock, cancel }
    }

    /// Drive the schedule until it is exhausted or cancelled.
    ///
    /// Effects are the register side effects of the backend calls and the
    /// sample lines written to `out`. The cancellation token is polled once
    /// per iteration and between sleep slices, never mid-batch-call.
    pub fn run(
        &self,
        backend: &mut dyn Backend,
        commands: &[Command],
        cores: &[CoreId],
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let start = self.clock.now_ms();
        let mut schedule = Schedule::new(commands, cores.len(), start);

        print_header(out, commands, cores)?;

        while !self.cancel.is_cancelled() {
            let now = self.clock.now_ms();
            let due: Vec<bool> = (0..commands.len())
                .map(|i| schedule.is_due(i, now))
                .collect();

            apply_commands(backend, commands, cores, &mut schedule, &due);
            print_samples(out, commands, &schedule, &due, start, now)?;

            let Some(next) = schedule.advance(commands, now) else {
                break;
            };
            schedule.reprime(commands);
            self.sleep_until(next);
        }

        Ok(())
    }

    fn sleep_until(&self, deadline: u64) {
        while !self.cancel.is_cancelled() {
            let now = self.clock.now_ms();
            if now >= deadline {
                return;
            }
            self.clock.sleep_ms((deadline - now).min(SLEEP_SLICE_MS));
        }
    }
}

/// Issue one batched backend call per due command. Write commands use the
/// read-and-swap batch so the row captures the pre-write register content.
/// A batch that does not succeed for every core degrades the whole row to
/// "no data" rather than taking partial credit.
fn apply_commands(
    backend: &mut dyn Backend,
    commands: &[Command],
    cores: &[CoreId],
    schedule: &mut Schedule,
    due: &[bool],
) {
    for (index, command) in commands.iter().enumerate() {
        if !due[index] {
            continue;
        }

        let (addrs, vals) = schedule.row_mut(index);
        let done = if command.write.is_some() {
            backend.read_write_batch(addrs, vals, cores)
        } else {
            backend.read_batch(addrs, cores, vals)
        };

        let failed = done < cores.len();
        if failed {
            tracing::debug!(
                "partial batch failure on 0x{:x}: {done}/{} cores, dropping row",
                command.address,
                cores.len()
            );
            vals.fill(0);
        }
        schedule.failed[index] = failed;
    }
}

/// One header line naming, for each printed command, its decorated address
/// repeated once per core with the core id annotated.
fn print_header(out: &mut dyn Write, commands: &[Command], cores: &[CoreId]) -> io::Result<()> {
    write!(out, "time ")?;
    for command in commands {
        let Some(base) = command.display else {
            continue;
        };
        let prefix = match base {
            Base::Dec => ":",
            Base::Hex => "::",
        };
        for &core in cores {
            write!(out, "{prefix}0x{:x}({core}) ", command.address)?;
        }
    }
    writeln!(out)?;
    out.flush()
}

/// One sample line per tick in which at least one printed command fired:
/// elapsed `seconds.milliseconds`, then per printed command either its
/// per-core values in the configured base, or one `-` per core when the
/// command is not due or its batch failed.
fn print_samples(
    out: &mut dyn Write,
    commands: &[Command],
    schedule: &Schedule,
    due: &[bool],
    start: u64,
    now: u64,
) -> io::Result<()> {
    let reporting = commands
        .iter()
        .enumerate()
        .any(|(i, c)| c.display.is_some() && due[i]);
    if !reporting {
        return Ok(());
    }

    let elapsed = now.saturating_sub(start);
    write!(out, "{}.{:03}", elapsed / 1000, elapsed % 1000)?;

    for (index, command) in commands.iter().enumerate() {
        let Some(base) = command.display else {
            continue;
        };

        if !due[index] || schedule.failed[index] {
            for _ in 0..schedule.width {
                write!(out, " -")?;
            }
        } else {
            for &value in schedule.row(index) {
                match base {
                    Base::Dec => write!(out, " {value}")?,
                    Base::Hex => write!(out, " {value:x}")?,
                }
            }
        }
    }

    writeln!(out)?;
    out.flush()
}
