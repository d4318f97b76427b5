//! NCR 53C710 SCSI I/O processor core
//!
//! The chip model lives in [`scsi::controller`]. Host memory and the interrupt
//! line are provided through [`bus::DmaHost`], the SCSI bus side through
//! [`scsi::ScsiBus`].

pub mod bus;
pub mod scsi;
pub mod tickable;
pub mod types;
pub mod util;
