//! Complete commands from selection to disconnect

use super::*;
use crate::scsi::bus::DEFAULT_MAX_BURST as DEFAULT_BURST;
use crate::scsi::regs::RegSstat0;
use crate::scsi::request::{CommandState, RequestState, WaitReason};
use crate::scsi::target::ScsiTarget;
use crate::scsi::{MSG_COMMAND_COMPLETE, STATUS_CHECK_CONDITION};

const MSGOUT: Address = 0x2000;
const CDB: Address = 0x2100;
const STATUS: Address = 0x2200;
const MSGIN: Address = 0x2300;
const BUF: Address = 0x3000;
const DONE: u32 = 0xD0E;

/// Select with ATN, identify, send `cdb`, run `data`, then status,
/// message in and disconnect
fn command_script<B: ScsiBus>(c: &mut TestController<B>, cdb: &[u8], data: &[Vec<u32>]) {
    c.host.write_bytes(MSGOUT, &[0x80]);
    c.host.write_bytes(CDB, cdb);
    c.host.write_bytes(STATUS, &[0xFF]);
    c.host.write_bytes(MSGIN, &[0xFF]);

    let mut script = vec![
        asm::select(2, true, 0),
        asm::block_move(1, ScsiPhase::MessageOut, MSGOUT),
        asm::block_move(cdb.len() as u32, ScsiPhase::Command, CDB),
    ];
    script.extend_from_slice(data);
    script.extend([
        asm::block_move(1, ScsiPhase::Status, STATUS),
        asm::block_move(1, ScsiPhase::MessageIn, MSGIN),
        asm::disconnect(),
        asm::int(DONE),
    ]);
    load_script(c, SCRIPT_BASE, &script);
}

fn assert_done<B: ScsiBus>(c: &TestController<B>, status: u8) {
    assert!(!c.is_script_active());
    assert_eq!(c.regs().dsps, DONE);
    assert_eq!(c.host.read_bytes(STATUS, 1), [status]);
    assert_eq!(c.host.read_bytes(MSGIN, 1), [0x00]);
    assert!(!c.regs().scntl1.con());
    assert_eq!(c.request_state(), RequestState::Idle);
    assert_eq!(c.host.irq_rising_edges(), 1);
}

#[test]
fn read_in_bursts() {
    let data: Vec<u8> = (0..512).map(|i| i as u8).collect();
    let mut bus = ScriptedBus::data_in(data.clone(), &[200, 312]);
    bus.hold = true;
    let mut c = controller(bus);
    command_script(
        &mut c,
        &[0x08, 0, 0, 0, 1, 0],
        &[asm::block_move(512, ScsiPhase::DataIn, BUF)],
    );
    start(&mut c, SCRIPT_BASE);

    // Block move issued, nothing from the target yet
    assert!(c.is_script_active());
    assert_eq!(c.wait_reason(), WaitReason::Dma);
    assert_eq!(c.regs().dsp, insn_addr(4));
    assert_eq!(c.regs().dbc, 512);
    assert_eq!(c.request_state(), RequestState::DataIn);
    assert_eq!(c.regs().ctest[0] & 1, 1);

    c.bus.release();
    c.process_events();
    assert_eq!(c.regs().dbc, 312);
    assert_eq!(c.regs().dnad, BUF + 200);
    assert_eq!(c.wait_reason(), WaitReason::Dma);
    assert_eq!(c.bus.held(), 1);

    c.bus.release();
    c.process_events();
    assert_eq!(c.regs().dbc, 0);
    assert_eq!(c.regs().dnad, BUF + 512);
    assert_eq!(c.command_state(), CommandState::Pending);

    c.bus.release();
    c.process_events();
    assert_eq!(c.command_state(), CommandState::Complete);
    assert_done(&c, STATUS_GOOD);
    assert_eq!(c.host.read_bytes(BUF, 512), data);
}

#[test]
fn burst_spans_block_moves() {
    let data: Vec<u8> = (0..512).map(|i| (i / 2) as u8).collect();
    let mut c = controller(ScriptedBus::data_in(data.clone(), &[512]));
    command_script(
        &mut c,
        &[0x08, 0, 0, 0, 1, 0],
        &[
            asm::block_move(100, ScsiPhase::DataIn, BUF),
            asm::block_move(412, ScsiPhase::DataIn, BUF + 100),
        ],
    );
    start(&mut c, SCRIPT_BASE);
    assert_done(&c, STATUS_GOOD);
    assert_eq!(c.host.read_bytes(BUF, 512), data);
}

#[test]
fn data_arrives_before_block_move() {
    let data = vec![0x3C; 64];
    let mut c = controller(ScriptedBus::data_in(data.clone(), &[64]));
    // Dawdle between command and data phase
    command_script(
        &mut c,
        &[0x08, 0, 0, 0, 1, 0],
        &[
            asm::set_carry(),
            asm::block_move(64, ScsiPhase::DataIn, BUF),
        ],
    );
    start(&mut c, SCRIPT_BASE);
    assert_done(&c, STATUS_GOOD);
    assert_eq!(c.host.read_bytes(BUF, 64), data);
}

#[test]
fn disk_read() {
    let mut c = controller(disk_bus(DEFAULT_BURST));
    command_script(
        &mut c,
        &[0x08, 0, 0, 3, 2, 0],
        &[
            asm::block_move(512, ScsiPhase::DataIn, BUF),
            asm::block_move(512, ScsiPhase::DataIn, BUF + 512),
        ],
    );
    start(&mut c, SCRIPT_BASE);

    assert_done(&c, STATUS_GOOD);
    let got = c.host.read_bytes(BUF, 1024);
    assert!(got[..512].iter().all(|&b| b == 3));
    assert!(got[512..].iter().all(|&b| b == 4));
    assert_eq!(c.bus.outstanding(), 0);
}

#[test]
fn disk_read_small_bursts() {
    let mut c = controller(disk_bus(100));
    command_script(
        &mut c,
        &[0x28, 0, 0, 0, 0, 7, 0, 0, 1, 0],
        &[asm::block_move(512, ScsiPhase::DataIn, BUF)],
    );
    start(&mut c, SCRIPT_BASE);
    assert_done(&c, STATUS_GOOD);
    assert!(c.host.read_bytes(BUF, 512).iter().all(|&b| b == 7));
}

#[test]
fn disk_write() {
    let mut c = controller(disk_bus(DEFAULT_BURST));
    c.host.write_bytes(BUF, &[0xA5; 512]);
    command_script(
        &mut c,
        &[0x0A, 0, 0, 5, 1, 0],
        &[asm::block_move(512, ScsiPhase::DataOut, BUF)],
    );
    start(&mut c, SCRIPT_BASE);

    assert_done(&c, STATUS_GOOD);
    let disk = c.bus.target(2).unwrap();
    assert!(disk.read(5, 1).iter().all(|&b| b == 0xA5));
    assert!(disk.read(6, 1).iter().all(|&b| b == 6));
}

#[test]
fn status_only_command() {
    let mut c = controller(disk_bus(DEFAULT_BURST));
    command_script(&mut c, &[0x00, 0, 0, 0, 0, 0], &[]);
    start(&mut c, SCRIPT_BASE);
    assert_done(&c, STATUS_GOOD);
}

#[test]
fn check_condition_status() {
    let mut c = controller(disk_bus(DEFAULT_BURST));
    // Beyond the end of the 16 block disk
    command_script(&mut c, &[0x08, 0, 0, 15, 2, 0], &[]);
    start(&mut c, SCRIPT_BASE);
    assert_done(&c, STATUS_CHECK_CONDITION);
    // Last byte through SFBR: COMMAND COMPLETE
    assert_eq!(c.regs().sfbr, MSG_COMMAND_COMPLETE);
}

#[test]
fn status_branch() {
    let mut c = controller(disk_bus(DEFAULT_BURST));
    c.host.write_bytes(MSGOUT, &[0x80]);
    c.host.write_bytes(CDB, &[0x08, 0, 0, 15, 2, 0]);
    load_script(
        &mut c,
        SCRIPT_BASE,
        &[
            asm::select(2, true, 0),
            asm::block_move(1, ScsiPhase::MessageOut, MSGOUT),
            asm::block_move(6, ScsiPhase::Command, CDB),
            asm::block_move(1, ScsiPhase::Status, STATUS),
            asm::jump_if_data(STATUS_CHECK_CONDITION, 0, insn_addr(6)),
            asm::int(0xBAD),
            asm::int(0xC4),
        ],
    );
    start(&mut c, SCRIPT_BASE);
    assert_eq!(c.regs().dsps, 0xC4);
    assert_eq!(c.regs().sfbr, STATUS_CHECK_CONDITION);
}

#[test]
fn unexpected_status_phase() {
    let mut c = controller(disk_bus(DEFAULT_BURST));
    c.write_reg(offset::SIEN, RegSstat0(0).with_ma(true).0);
    command_script(
        &mut c,
        &[0x08, 0, 0, 15, 2, 0],
        &[asm::block_move(512, ScsiPhase::DataIn, BUF)],
    );
    start(&mut c, SCRIPT_BASE);

    assert!(!c.is_script_active());
    assert!(c.regs().sstat0.ma());
    assert_eq!(c.regs().dsp, insn_addr(3));
    assert_eq!(c.phase(), ScsiPhase::Status);
    assert!(c.get_irq());

    // The host skips the data move and resumes at the status phase
    assert_eq!(c.read_reg(offset::SSTAT0), 0x80);
    start(&mut c, insn_addr(4));
    assert_eq!(c.regs().dsps, DONE);
    assert_eq!(c.host.read_bytes(STATUS, 1), [STATUS_CHECK_CONDITION]);
}

#[test]
fn table_indirect_move() {
    const DSA: Address = 0x4000;
    let mut c = controller(disk_bus(DEFAULT_BURST));
    c.write_sized(offset::DSA, 4, DSA);
    // Count (24 bit LE) and address (LE)
    c.host.write_bytes(DSA + 0x10, &[0x00, 0x02, 0x00, 0x00]);
    c.host.write_le32(DSA + 0x14, BUF);
    command_script(
        &mut c,
        &[0x08, 0, 0, 9, 1, 0],
        &[asm::block_move_table(ScsiPhase::DataIn, 0x10)],
    );
    start(&mut c, SCRIPT_BASE);
    assert_done(&c, STATUS_GOOD);
    assert!(c.host.read_bytes(BUF, 512).iter().all(|&b| b == 9));
}

#[test]
fn indirect_move() {
    const PTR: Address = 0x4800;
    let mut c = controller(disk_bus(DEFAULT_BURST));
    c.host.write_be32(PTR, BUF + 0x100);
    command_script(
        &mut c,
        &[0x08, 0, 0, 1, 1, 0],
        &[asm::block_move_indirect(512, ScsiPhase::DataIn, PTR)],
    );
    start(&mut c, SCRIPT_BASE);
    assert_done(&c, STATUS_GOOD);
    assert!(c.host.read_bytes(BUF + 0x100, 512).iter().all(|&b| b == 1));
}

#[test]
fn new_command_supersedes_request() {
    let mut bus = ScriptedBus::data_in(vec![0; 512], &[512]);
    bus.hold = true;
    let mut c = controller(bus);
    c.host.write_bytes(CDB, &[0x08, 0, 0, 0, 1, 0]);
    load_script(
        &mut c,
        SCRIPT_BASE,
        &[
            asm::select(2, false, 0),
            asm::block_move(6, ScsiPhase::Command, CDB),
            // Force the bus back to the command phase
            asm::reg_rw(7, 0, offset::SBCL, ScsiPhase::Command as u8),
            asm::block_move(6, ScsiPhase::Command, CDB),
            asm::int(1),
        ],
    );
    start(&mut c, SCRIPT_BASE);

    assert_eq!(c.regs().dsps, 1);
    assert_eq!(c.bus.issued.len(), 2);
    assert_eq!(c.bus.cancelled, [RequestId(1)]);
    assert_eq!(c.active_request().map(|r| r.req), Some(RequestId(2)));
}

#[test]
fn unknown_target_times_out() {
    let mut c = controller(disk_bus(DEFAULT_BURST));
    c.write_reg(offset::SIEN, RegSstat0(0).with_sto(true).0);
    c.host.write_bytes(CDB, &[0x00, 0, 0, 0, 0, 0]);
    load_script(
        &mut c,
        SCRIPT_BASE,
        &[asm::select(5, false, 0), asm::int(1)],
    );
    start(&mut c, SCRIPT_BASE);

    assert!(!c.is_script_active());
    assert!(c.regs().sstat0.sto());
    assert_eq!(c.regs().sdid, 1 << 5);
    assert!(c.get_irq());
}
