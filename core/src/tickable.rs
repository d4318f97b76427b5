use anyhow::Result;

/// Representation of X amount of ticks of the clock driving the
/// SCSI core (used for the reselection retry delay).
pub type Ticks = u64;

pub trait Tickable {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks>;
}
