//! Reference SCSI bus with directly attached targets
//!
//! Commands execute synchronously on the target; the data phase is handed
//! to the initiator in bursts through an event mailbox, the same way an
//! asynchronous backend would.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{Receiver, Sender};

use crate::scsi::target::ScsiTarget;
use crate::scsi::{
    RequestId, ScsiBus, ScsiBusEvent, ScsiCmdResult, ScsiDevice, TransferDirection,
    STATUS_CHECK_CONDITION, STATUS_GOOD,
};

/// Target ids 0 to 6; id 7 belongs to the initiator
pub const SCSI_BUS_IDS: usize = 7;

/// Default maximum burst size handed to the initiator
pub const DEFAULT_MAX_BURST: usize = 64 * 1024;

enum Stage {
    /// No data phase, status already reported
    Status,
    /// Target to initiator
    DataIn { data: Vec<u8>, pos: usize, burst: usize },
    /// Initiator to target
    DataOut { data: Vec<u8>, pos: usize, burst: usize },
}

struct BusRequest {
    target: u8,
    cdb: Vec<u8>,
    stage: Stage,
}

/// SCSI bus connecting up to 7 targets to the initiator
pub struct ScsiTargetBus {
    targets: [Option<Box<dyn ScsiTarget>>; SCSI_BUS_IDS],
    max_burst: usize,
    next_req: u64,
    requests: HashMap<RequestId, BusRequest>,
    event_tx: Sender<ScsiBusEvent>,
    event_rx: Receiver<ScsiBusEvent>,
}

impl ScsiTargetBus {
    pub fn new() -> Self {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        Self {
            targets: Default::default(),
            max_burst: DEFAULT_MAX_BURST,
            next_req: 1,
            requests: HashMap::new(),
            event_tx,
            event_rx,
        }
    }

    /// Largest chunk announced per TransferData event
    pub fn set_max_burst(&mut self, max_burst: usize) {
        self.max_burst = max_burst.max(1);
    }

    pub fn attach(&mut self, id: u8, target: Box<dyn ScsiTarget>) -> Result<()> {
        let Some(slot) = self.targets.get_mut(id as usize) else {
            bail!("Invalid SCSI id {}", id);
        };
        if slot.is_some() {
            bail!("SCSI id {} already in use", id);
        }
        *slot = Some(target);
        Ok(())
    }

    pub fn detach(&mut self, id: u8) -> Option<Box<dyn ScsiTarget>> {
        // Drop anything in flight for the target
        let stale: Vec<_> = self
            .requests
            .iter()
            .filter(|(_, r)| r.target == id)
            .map(|(&k, _)| k)
            .collect();
        for req in stale {
            self.cancel_request(req);
        }
        self.targets.get_mut(id as usize)?.take()
    }

    pub fn target(&self, id: u8) -> Option<&dyn ScsiTarget> {
        self.targets.get(id as usize)?.as_deref()
    }

    /// Requests in flight
    pub fn outstanding(&self) -> usize {
        self.requests.len()
    }

    fn post(&self, event: ScsiBusEvent) {
        // Cannot fail, the receiver lives in self
        let _ = self.event_tx.send(event);
    }

    fn complete(&mut self, req: RequestId, status: u8, residual: usize) {
        self.requests.remove(&req);
        self.post(ScsiBusEvent::Complete {
            req,
            status,
            residual,
        });
    }

    /// Hands the collected data-out bytes to the target
    fn finish_data_out(&mut self, req: RequestId) {
        let Some(BusRequest {
            target,
            cdb,
            stage: Stage::DataOut { data, .. },
        }) = self.requests.get(&req)
        else {
            return;
        };
        let Some(dev) = self.targets[*target as usize].as_mut() else {
            self.complete(req, STATUS_CHECK_CONDITION, 0);
            return;
        };

        let status = match dev.cmd(cdb, Some(data.as_slice())) {
            Ok(ScsiCmdResult::Status(s)) => s,
            Ok(_) => {
                log::error!("Target {}: unexpected result after data out", target);
                STATUS_CHECK_CONDITION
            }
            Err(e) => {
                log::error!("Target {} command {:02X?}: {:#}", target, cdb, e);
                STATUS_CHECK_CONDITION
            }
        };
        self.complete(req, status, 0);
    }
}

impl ScsiBus for ScsiTargetBus {
    fn find_target(&self, id: u8, lun: u8) -> Option<ScsiDevice> {
        if lun != 0 {
            return None;
        }
        self.target(id).map(|_| ScsiDevice { id, lun })
    }

    fn issue_command(
        &mut self,
        device: ScsiDevice,
        _tag: u32,
        cdb: &[u8],
    ) -> Result<(RequestId, TransferDirection)> {
        let Some(target) = self.targets.get_mut(device.id as usize).and_then(|t| t.as_mut())
        else {
            bail!("No target at id {}", device.id);
        };
        let result = target
            .cmd(cdb, None)
            .with_context(|| format!("Target {}", device.id))?;

        let req = RequestId(self.next_req);
        self.next_req += 1;

        let (stage, direction) = match result {
            ScsiCmdResult::Status(status) => {
                self.post(ScsiBusEvent::Complete {
                    req,
                    status,
                    residual: 0,
                });
                (Stage::Status, TransferDirection::None)
            }
            ScsiCmdResult::DataIn(data) if data.is_empty() => {
                self.post(ScsiBusEvent::Complete {
                    req,
                    status: STATUS_GOOD,
                    residual: 0,
                });
                (Stage::Status, TransferDirection::None)
            }
            ScsiCmdResult::DataIn(data) => (
                Stage::DataIn {
                    data,
                    pos: 0,
                    burst: 0,
                },
                TransferDirection::In,
            ),
            ScsiCmdResult::DataOut(len) => (
                Stage::DataOut {
                    data: vec![0; len],
                    pos: 0,
                    burst: 0,
                },
                TransferDirection::Out,
            ),
        };

        if !matches!(stage, Stage::Status) {
            self.requests.insert(
                req,
                BusRequest {
                    target: device.id,
                    cdb: cdb.to_vec(),
                    stage,
                },
            );
        }
        Ok((req, direction))
    }

    fn continue_request(&mut self, req: RequestId) {
        let max_burst = self.max_burst;
        let Some(request) = self.requests.get_mut(&req) else {
            return;
        };
        let (len, pos, burst) = match &mut request.stage {
            Stage::Status => return,
            Stage::DataIn { data, pos, burst } | Stage::DataOut { data, pos, burst } => {
                (data.len(), pos, burst)
            }
        };

        *pos += *burst;
        if *pos < len {
            *burst = (len - *pos).min(max_burst);
            let burst = *burst;
            self.post(ScsiBusEvent::TransferData { req, len: burst });
            return;
        }
        *burst = 0;

        if matches!(request.stage, Stage::DataOut { .. }) {
            self.finish_data_out(req);
        } else {
            self.complete(req, STATUS_GOOD, 0);
        }
    }

    fn cancel_request(&mut self, req: RequestId) {
        if self.requests.remove(&req).is_some() {
            self.post(ScsiBusEvent::Cancelled { req });
        }
    }

    fn request_buffer(&mut self, req: RequestId) -> &mut [u8] {
        match self.requests.get_mut(&req).map(|r| &mut r.stage) {
            Some(Stage::DataIn { data, pos, burst } | Stage::DataOut { data, pos, burst }) => {
                &mut data[*pos..*pos + *burst]
            }
            _ => &mut [],
        }
    }

    fn poll_event(&mut self) -> Option<ScsiBusEvent> {
        self.event_rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scsi::disk::{ScsiTargetDisk, DISK_BLOCKSIZE};

    fn bus() -> ScsiTargetBus {
        let mut bus = ScsiTargetBus::new();
        let mut contents = vec![0; DISK_BLOCKSIZE * 8];
        contents[0] = 0xAB;
        bus.attach(2, Box::new(ScsiTargetDisk::from_bytes(contents).unwrap()))
            .unwrap();
        bus
    }

    #[test]
    fn find_target() {
        let b = bus();
        assert_eq!(b.find_target(2, 0), Some(ScsiDevice { id: 2, lun: 0 }));
        assert_eq!(b.find_target(2, 1), None);
        assert_eq!(b.find_target(3, 0), None);
        assert_eq!(b.find_target(9, 0), None);
    }

    #[test]
    fn attach_twice() {
        let mut b = bus();
        assert!(b.attach(2, Box::new(ScsiTargetDisk::blank(1))).is_err());
        assert!(b.attach(7, Box::new(ScsiTargetDisk::blank(1))).is_err());
        assert!(b.attach(8, Box::new(ScsiTargetDisk::blank(1))).is_err());
        assert!(b.detach(2).is_some());
        assert!(b.find_target(2, 0).is_none());
    }

    #[test]
    fn status_only() {
        let mut b = bus();
        let dev = b.find_target(2, 0).unwrap();
        let (req, dir) = b.issue_command(dev, 0, &[0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(dir, TransferDirection::None);
        assert_eq!(
            b.poll_event(),
            Some(ScsiBusEvent::Complete {
                req,
                status: STATUS_GOOD,
                residual: 0
            })
        );
        assert_eq!(b.poll_event(), None);
        assert_eq!(b.outstanding(), 0);
    }

    #[test]
    fn data_in_bursts() {
        let mut b = bus();
        b.set_max_burst(200);
        let dev = b.find_target(2, 0).unwrap();
        let (req, dir) = b.issue_command(dev, 0, &[0x08, 0, 0, 0, 1, 0]).unwrap();
        assert_eq!(dir, TransferDirection::In);
        assert!(b.request_buffer(req).is_empty());

        let mut got = vec![];
        for expect in [200, 200, 112] {
            b.continue_request(req);
            assert_eq!(
                b.poll_event(),
                Some(ScsiBusEvent::TransferData { req, len: expect })
            );
            got.extend_from_slice(b.request_buffer(req));
        }
        b.continue_request(req);
        assert!(matches!(
            b.poll_event(),
            Some(ScsiBusEvent::Complete { status: STATUS_GOOD, .. })
        ));
        assert_eq!(got.len(), DISK_BLOCKSIZE);
        assert_eq!(got[0], 0xAB);
        assert!(b.request_buffer(req).is_empty());
    }

    #[test]
    fn data_out() {
        let mut b = bus();
        let dev = b.find_target(2, 0).unwrap();
        let (req, dir) = b.issue_command(dev, 0, &[0x0A, 0, 0, 1, 1, 0]).unwrap();
        assert_eq!(dir, TransferDirection::Out);

        b.continue_request(req);
        assert_eq!(
            b.poll_event(),
            Some(ScsiBusEvent::TransferData {
                req,
                len: DISK_BLOCKSIZE
            })
        );
        b.request_buffer(req).fill(0x5A);
        b.continue_request(req);
        assert!(matches!(
            b.poll_event(),
            Some(ScsiBusEvent::Complete { status: STATUS_GOOD, .. })
        ));

        let dev = b.find_target(2, 0).unwrap();
        let (req, _) = b.issue_command(dev, 0, &[0x08, 0, 0, 1, 1, 0]).unwrap();
        b.continue_request(req);
        b.poll_event();
        assert!(b.request_buffer(req).iter().all(|&x| x == 0x5A));
    }

    #[test]
    fn cancel() {
        let mut b = bus();
        let dev = b.find_target(2, 0).unwrap();
        let (req, _) = b.issue_command(dev, 0, &[0x08, 0, 0, 0, 1, 0]).unwrap();
        b.cancel_request(req);
        assert_eq!(b.poll_event(), Some(ScsiBusEvent::Cancelled { req }));
        // Unknown requests are ignored
        b.cancel_request(req);
        b.continue_request(req);
        assert_eq!(b.poll_event(), None);
    }

    #[test]
    fn failing_command() {
        let mut b = bus();
        let dev = b.find_target(2, 0).unwrap();
        assert!(b.issue_command(dev, 0, &[]).is_err());
    }
}
