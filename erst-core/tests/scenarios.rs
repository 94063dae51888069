// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end scenarios against the public `Store`/`MailboxHandler` API,
//! covering concrete cases that don't require poking crash-interrupted
//! flash state directly (those live as unit tests next to the Recovery
//! Engine, since the hook that injects them is crate-private).

use erst_api::{ErrorLogAddressRange, Mailbox, Operation, StatusCode};
use erst_core::{format_record, Doorbell, FlashDevice, MailboxHandler, SimFlash, Store, HEADER_LEN};

const SECTOR: u32 = 4096;
const BLOCK: u32 = 16 * 1024;

fn store(num_blocks: u32) -> Store {
    let capacity = num_blocks * BLOCK;
    Store::init(Box::new(SimFlash::new(SECTOR, capacity)), 0, capacity)
}

struct NullDoorbell;
impl Doorbell for NullDoorbell {
    fn clear_busy(&mut self) {}
}

fn mailbox() -> Mailbox {
    Mailbox {
        operation: 0,
        status: 0,
        record_offset: 0,
        record_id: 0,
        record_count: 0,
        timings: 0,
        error_log_address_range: ErrorLogAddressRange {
            physical_base: 0,
            length: 0,
            attributes: 0,
        },
    }
}

#[test]
fn fill_read_back_and_clear() {
    let mut s = store(4);
    for i in 0..10u64 {
        s.write(0x1000 + i, &vec![i as u8; 64]).unwrap();
    }
    for i in 0..10u64 {
        assert_eq!(s.read(0x1000 + i).unwrap(), vec![i as u8; 64]);
    }
    for i in 0..10u64 {
        s.clear(0x1000 + i).unwrap();
        assert!(s.read(0x1000 + i).is_err());
    }
}

#[test]
fn replacing_a_record_keeps_the_same_identity_and_new_payload() {
    let mut s = store(4);
    s.write(0x42, &[1, 2, 3]).unwrap();
    s.write(0x42, &[4, 5, 6, 7]).unwrap();
    assert_eq!(s.read(0x42).unwrap(), vec![4, 5, 6, 7]);
}

#[test]
fn out_of_space_reports_out_of_resources_without_corrupting_existing_records() {
    let mut s = store(2);
    let mut last_ok = 0;
    for i in 0..10_000u64 {
        match s.write(0x5000 + i, &vec![0xCC; 4000]) {
            Ok(()) => last_ok = i,
            Err(_) => break,
        }
    }
    assert!(s.read(0x5000).is_ok());
    assert_eq!(
        s.read(0x5000 + last_ok).unwrap(),
        vec![0xCC; 4000],
        "the last record admitted before exhaustion must still read back intact"
    );
}

#[test]
fn dummy_write_never_persists_a_record() {
    let mut s = store(4);
    s.dummy_write(0x77, 128).unwrap();
    assert!(s.read(0x77).is_err());
    assert_eq!(s.next_record_id(erst_api::RECORD_ID_FIRST), erst_api::RECORD_ID_INVALID);
}

#[test]
fn enumeration_visits_every_surviving_record_exactly_once_in_insertion_order() {
    let mut s = store(4);
    let ids = [0x10u64, 0x20, 0x30, 0x40];
    for &id in &ids {
        s.write(id, &[0xEE]).unwrap();
    }
    s.clear(0x20).unwrap();

    let mut cursor = erst_api::RECORD_ID_FIRST;
    let mut visited = Vec::new();
    loop {
        cursor = s.next_record_id(cursor);
        if visited.contains(&cursor) || cursor == erst_api::RECORD_ID_INVALID {
            break;
        }
        visited.push(cursor);
    }
    assert_eq!(visited, vec![0x10, 0x30, 0x40]);
}

#[test]
fn mailbox_write_execute_read_round_trip() {
    let mut h = MailboxHandler::new(store(4));
    let mut bell = NullDoorbell;
    let mut mb = mailbox();

    let record = format_record(0xABCD, b"hello").unwrap();
    let mut buf = [0u8; 512];
    buf[..record.len()].copy_from_slice(&record);

    mb.record_id = 0xABCD;
    mb.record_offset = 0;
    mb.operation = Operation::BeginWrite as u32;
    h.handle(&mut mb, &mut buf, &mut bell);
    assert_eq!(mb.status, StatusCode::Success.into_mailbox_word());
    mb.operation = Operation::Execute as u32;
    h.handle(&mut mb, &mut buf, &mut bell);
    assert_eq!(mb.status, StatusCode::Success.into_mailbox_word());
    mb.operation = Operation::End as u32;
    h.handle(&mut mb, &mut buf, &mut bell);

    mb.record_id = erst_api::RECORD_ID_FIRST;
    mb.record_offset = 0;
    mb.operation = Operation::BeginRead as u32;
    h.handle(&mut mb, &mut buf, &mut bell);
    mb.operation = Operation::Execute as u32;
    let mut out = [0u8; 512];
    h.handle(&mut mb, &mut out, &mut bell);
    assert_eq!(mb.status, StatusCode::Success.into_mailbox_word());
    assert_eq!(mb.record_id, 0xABCD);
    assert_eq!(&out[HEADER_LEN..HEADER_LEN + 5], b"hello");
    assert_eq!(mb.record_count, 1);
}

#[test]
fn clearing_an_unknown_record_reports_not_found() {
    let mut s = store(4);
    assert!(s.clear(0x9999).is_err());
}

#[test]
fn geometry_is_honest_about_capacity() {
    // A one-sector partition can't form two virtual blocks.
    let flash: Box<dyn FlashDevice> = Box::new(SimFlash::new(SECTOR, SECTOR));
    let s = Store::init(flash, 0, SECTOR);
    assert!(s.init_status().is_err());
}
