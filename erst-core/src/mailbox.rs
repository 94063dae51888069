// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Mailbox Handler: the synchronous, single-threaded
//! dispatcher sitting between the shared-memory [`erst_api::Mailbox`]
//! struct and the [`Store`]'s record operations.
//!
//! Modeled on the ACPI ERST action set `erst_api::Operation` actually
//! encodes: a caller stages one of BEGIN_READ/BEGIN_WRITE/BEGIN_CLEAR,
//! transfers any payload through the separate buffer named by
//! `error_log_address_range`, then fires EXECUTE to commit it and END to
//! release the stage. `GET_STATUS` and `CHECK_BUSY_STATUS` never touch the
//! store and must never clobber the status word left by the operation that
//! preceded them.

use num_traits::FromPrimitive;

use erst_api::{ErstError, Mailbox, Operation, StatusCode, RECORD_ID_FIRST, RECORD_ID_INVALID};

use crate::codec::read_header;
use crate::header::HEADER_LEN;
use crate::store::Store;

/// Clears the busy/doorbell bit after a request completes. A real platform
/// backs this with an MMIO register write; tests use a plain `bool` flag.
pub trait Doorbell {
    fn clear_busy(&mut self);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Pending {
    Write { record_offset: u64, record_id: u64 },
    Read { cursor: u64 },
    Clear { record_id: u64 },
}

/// Resolves `offset` within `payload`, failing if `[offset, offset+want)`
/// doesn't fit: the bounds-check the Flash Adapter applies to its own
/// `offset + len`, applied here against the error-log buffer instead.
fn offset_in_bounds(offset: u64, payload_len: usize, want: usize) -> Result<usize, Outcome> {
    let offset = usize::try_from(offset).map_err(|_| Outcome::Core(ErstError::InvalidParameter))?;
    let end = offset
        .checked_add(want)
        .ok_or(Outcome::Core(ErstError::InvalidParameter))?;
    if end > payload_len {
        return Err(Outcome::Core(ErstError::InvalidParameter));
    }
    Ok(offset)
}

/// Copies the full CPER record (header then body) out of the error-log
/// buffer at `record_offset`: reads just the header first to learn
/// `record_length`, bounds-checks both against the buffer, then copies the
/// whole thing into a private buffer standing in for a pool allocation.
fn stage_record(record_offset: u64, payload: &[u8]) -> Result<Vec<u8>, Outcome> {
    let header_start = offset_in_bounds(record_offset, payload.len(), HEADER_LEN)?;
    let header = read_header(&payload[header_start..])
        .ok_or(Outcome::Core(ErstError::InvalidParameter))?;
    let record_length = header.record_length as usize;
    let start = offset_in_bounds(record_offset, payload.len(), record_length)?;
    Ok(payload[start..start + record_length].to_vec())
}

/// The non-`ErstError` status reserved for "read with nothing to read"
/// (see `erst_api::ErstError`'s doc comment): a mailbox precondition, not a
/// failure any inner component produces.
enum Outcome {
    Core(ErstError),
    RecordStoreEmpty,
}

impl From<ErstError> for Outcome {
    fn from(e: ErstError) -> Self {
        Outcome::Core(e)
    }
}

pub struct MailboxHandler {
    store: Store,
    pending: Option<Pending>,
}

impl MailboxHandler {
    pub fn new(store: Store) -> Self {
        MailboxHandler {
            store,
            pending: None,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Services exactly one doorbell ring: decodes `mailbox.operation`,
    /// executes it against `payload` (the out-of-band buffer named by
    /// `error_log_address_range`), stamps `mailbox.status`, and clears the
    /// busy bit. `GET_STATUS`/`CHECK_BUSY_STATUS` only clear busy; they
    /// leave whatever status the previous operation left in place.
    pub fn handle(&mut self, mailbox: &mut Mailbox, payload: &mut [u8], doorbell: &mut dyn Doorbell) {
        let op = Operation::from_u32(mailbox.operation);
        if matches!(op, Some(Operation::GetStatus) | Some(Operation::CheckBusy)) {
            doorbell.clear_busy();
            return;
        }

        let status = match self.dispatch(op, mailbox, payload) {
            Ok(()) => {
                mailbox.record_count = self.store.record_count();
                StatusCode::Success
            }
            Err(Outcome::Core(e)) => StatusCode::from(e),
            Err(Outcome::RecordStoreEmpty) => StatusCode::RecordStoreEmpty,
        };
        mailbox.status = status.into_mailbox_word();
        doorbell.clear_busy();
    }

    fn dispatch(
        &mut self,
        op: Option<Operation>,
        mailbox: &mut Mailbox,
        payload: &mut [u8],
    ) -> Result<(), Outcome> {
        // A desynced store re-initializes before any operation runs, since
        // its tables can no longer be trusted.
        if self.store.is_desynced() {
            self.store.resync();
            self.store.init_status().map_err(Outcome::Core)?;
        }

        match op.ok_or(Outcome::Core(ErstError::ProtocolError))? {
            Operation::Invalid => Err(Outcome::Core(ErstError::ProtocolError)),
            Operation::BeginWrite => self.begin(Pending::Write {
                record_offset: mailbox.record_offset,
                record_id: mailbox.record_id,
            }),
            Operation::BeginRead => self.begin(Pending::Read {
                cursor: mailbox.record_id,
            }),
            Operation::BeginClear => self.begin(Pending::Clear {
                record_id: mailbox.record_id,
            }),
            Operation::DummyWrite => self.dummy_write(mailbox, payload),
            Operation::End => {
                self.pending = None;
                Ok(())
            }
            Operation::Execute => self.execute(mailbox, payload),
            Operation::CheckBusy | Operation::GetStatus => unreachable!("handled by caller"),
        }
    }

    fn begin(&mut self, pending: Pending) -> Result<(), Outcome> {
        if self.pending.is_some() {
            return Err(Outcome::Core(ErstError::ProtocolError));
        }
        self.pending = Some(pending);
        Ok(())
    }

    fn dummy_write(&mut self, mailbox: &mut Mailbox, payload: &[u8]) -> Result<(), Outcome> {
        if self.pending.is_some() {
            return Err(Outcome::Core(ErstError::ProtocolError));
        }
        let mut record_bytes = stage_record(mailbox.record_offset, payload)?;
        self.store
            .write_raw_record(&mut record_bytes, true)
            .map(|_| ())
            .map_err(Outcome::from)
    }

    fn execute(&mut self, mailbox: &mut Mailbox, payload: &mut [u8]) -> Result<(), Outcome> {
        let pending = self
            .pending
            .take()
            .ok_or(Outcome::Core(ErstError::ProtocolError))?;

        match pending {
            Pending::Write {
                record_offset,
                record_id,
            } => {
                let mut record_bytes = stage_record(record_offset, payload)?;
                let written_id = self
                    .store
                    .write_raw_record(&mut record_bytes, false)
                    .map_err(Outcome::from)?;
                if record_id == RECORD_ID_INVALID {
                    mailbox.record_id = written_id;
                }
                Ok(())
            }
            Pending::Read { cursor } => {
                if self.store.record_count() == 0 {
                    return Err(Outcome::RecordStoreEmpty);
                }
                let read_id = if cursor == RECORD_ID_FIRST {
                    self.store.next_record_id(RECORD_ID_FIRST)
                } else {
                    cursor
                };
                if read_id == RECORD_ID_INVALID {
                    mailbox.record_id = self.store.next_record_id(RECORD_ID_FIRST);
                    return Err(Outcome::Core(ErstError::NotFound));
                }
                let bytes = match self.store.read_raw(read_id) {
                    Ok(bytes) => bytes,
                    Err(ErstError::NotFound) => {
                        mailbox.record_id = self.store.next_record_id(RECORD_ID_FIRST);
                        return Err(Outcome::Core(ErstError::NotFound));
                    }
                    Err(e) => return Err(Outcome::from(e)),
                };
                let start = offset_in_bounds(mailbox.record_offset, payload.len(), bytes.len())?;
                payload[start..start + bytes.len()].copy_from_slice(&bytes);
                mailbox.record_id = self.store.next_record_id(read_id);
                Ok(())
            }
            Pending::Clear { record_id } => {
                self.store.clear(record_id).map_err(Outcome::from)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::build_header;
    use crate::test_support::test_store;
    use erst_api::ErrorLogAddressRange;
    use zerocopy::AsBytes;

    struct FakeDoorbell {
        cleared: bool,
    }
    impl Doorbell for FakeDoorbell {
        fn clear_busy(&mut self) {
            self.cleared = true;
        }
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

    /// Builds a full CPER record (header + body) at `offset` in `payload`,
    /// the way a caller stages a WRITE/DUMMY_WRITE request.
    fn stage_cper(payload: &mut [u8], offset: usize, record_id: u64, body: &[u8]) {
        let record_length = (HEADER_LEN + body.len()) as u32;
        let header = build_header(record_id, record_length);
        header.write_to(&mut payload[offset..offset + HEADER_LEN]);
        payload[offset + HEADER_LEN..offset + HEADER_LEN + body.len()].copy_from_slice(body);
    }

    #[test]
    fn write_then_read_round_trips_through_the_mailbox() {
        let mut h = MailboxHandler::new(test_store(4));
        let mut mb = mailbox();
        let mut payload = [0u8; 256];
        let mut bell = FakeDoorbell { cleared: false };

        stage_cper(&mut payload, 0, 0x99, &[1, 2, 3, 4]);
        mb.record_id = RECORD_ID_INVALID;
        mb.record_offset = 0;
        mb.operation = Operation::BeginWrite as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        assert_eq!(mb.status, StatusCode::Success.into_mailbox_word());

        mb.operation = Operation::Execute as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        assert_eq!(mb.status, StatusCode::Success.into_mailbox_word());
        assert_eq!(mb.record_id, 0x99, "INVALID input id is replaced with the one just written");

        mb.operation = Operation::End as u32;
        h.handle(&mut mb, &mut payload, &mut bell);

        mb.record_id = RECORD_ID_FIRST;
        mb.record_offset = 0;
        mb.operation = Operation::BeginRead as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        mb.operation = Operation::Execute as u32;
        let mut read_buf = [0u8; 256];
        h.handle(&mut mb, &mut read_buf, &mut bell);
        assert_eq!(mb.status, StatusCode::Success.into_mailbox_word());
        // Only one record exists, so the cursor wraps back onto it.
        assert_eq!(mb.record_id, 0x99);
        assert_eq!(mb.record_count, 1);
        assert_eq!(&read_buf[HEADER_LEN..HEADER_LEN + 4], &[1, 2, 3, 4]);
        assert!(bell.cleared);
    }

    #[test]
    fn read_advances_the_cursor_past_the_record_just_read() {
        let mut h = MailboxHandler::new(test_store(4));
        let mut mb = mailbox();
        let mut payload = [0u8; 512];
        let mut bell = FakeDoorbell { cleared: false };

        stage_cper(&mut payload, 0, 0x99, &[1, 2, 3, 4]);
        mb.record_id = RECORD_ID_INVALID;
        mb.record_offset = 0;
        mb.operation = Operation::BeginWrite as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        mb.operation = Operation::Execute as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        mb.operation = Operation::End as u32;
        h.handle(&mut mb, &mut payload, &mut bell);

        stage_cper(&mut payload, 256, 0xAA, &[5, 6, 7, 8]);
        mb.record_id = RECORD_ID_INVALID;
        mb.record_offset = 256;
        mb.operation = Operation::BeginWrite as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        mb.operation = Operation::Execute as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        mb.operation = Operation::End as u32;
        h.handle(&mut mb, &mut payload, &mut bell);

        mb.record_id = RECORD_ID_FIRST;
        mb.record_offset = 0;
        mb.operation = Operation::BeginRead as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        mb.operation = Operation::Execute as u32;
        let mut read_buf = [0u8; 256];
        h.handle(&mut mb, &mut read_buf, &mut bell);
        assert_eq!(mb.status, StatusCode::Success.into_mailbox_word());
        assert_eq!(&read_buf[HEADER_LEN..HEADER_LEN + 4], &[1, 2, 3, 4]);
        // The cursor now names the *next* record, not the one just read.
        assert_eq!(mb.record_id, 0xAA);

        mb.operation = Operation::BeginRead as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        mb.operation = Operation::Execute as u32;
        h.handle(&mut mb, &mut read_buf, &mut bell);
        assert_eq!(mb.status, StatusCode::Success.into_mailbox_word());
        assert_eq!(&read_buf[HEADER_LEN..HEADER_LEN + 4], &[5, 6, 7, 8]);
        // Two records total, so the cursor wraps back to the first.
        assert_eq!(mb.record_id, 0x99);
    }

    #[test]
    fn read_on_empty_store_reports_record_store_empty() {
        let mut h = MailboxHandler::new(test_store(4));
        let mut mb = mailbox();
        let mut payload = [0u8; 16];
        let mut bell = FakeDoorbell { cleared: false };

        mb.operation = Operation::BeginRead as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        mb.operation = Operation::Execute as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        assert_eq!(mb.status, StatusCode::RecordStoreEmpty.into_mailbox_word());
    }

    #[test]
    fn execute_without_begin_is_a_protocol_error() {
        let mut h = MailboxHandler::new(test_store(4));
        let mut mb = mailbox();
        let mut payload = [0u8; 16];
        let mut bell = FakeDoorbell { cleared: false };

        mb.operation = Operation::Execute as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        assert_eq!(mb.status, StatusCode::Failed.into_mailbox_word());
    }

    #[test]
    fn get_status_does_not_clobber_the_prior_result() {
        let mut h = MailboxHandler::new(test_store(4));
        let mut mb = mailbox();
        let mut payload = [0u8; 16];
        let mut bell = FakeDoorbell { cleared: false };

        mb.operation = Operation::Execute as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        let status_after_failure = mb.status;

        mb.operation = Operation::GetStatus as u32;
        h.handle(&mut mb, &mut payload, &mut bell);
        assert_eq!(mb.status, status_after_failure);
    }
}
