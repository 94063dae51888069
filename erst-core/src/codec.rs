// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Record Codec: header validation and in-place status
//! updates.

use erst_api::ErstError;
use zerocopy::{AsBytes, FromBytes};

use crate::header::{
    RecordHeader, RecordStatus, PERSISTENCE_MAJOR, PERSISTENCE_MINOR,
    PERSISTENCE_SIGNATURE, REVISION, SIGNATURE_END, SIGNATURE_START,
    STATUS_OFFSET_IN_HEADER,
};
use crate::store::Store;
use crate::tracker::RecordRef;

/// Distinguishes the ways a header can fail validation: the Recovery Engine
/// needs to tell a wrong-version header apart from one with an illegal id,
/// even though both are "validation failure" for the purposes of
/// reconciling an OUTGOING/INCOMING pair.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HeaderValidation {
    BadSignature,
    BadVersion,
    BadId,
    BadStatus,
    BadPersistenceInfo,
}

impl From<HeaderValidation> for ErstError {
    fn from(v: HeaderValidation) -> Self {
        match v {
            HeaderValidation::BadSignature | HeaderValidation::BadVersion => {
                ErstError::IncompatibleVersion
            }
            HeaderValidation::BadId
            | HeaderValidation::BadStatus
            | HeaderValidation::BadPersistenceInfo => ErstError::CompromisedData,
        }
    }
}

/// Checks the three record magics, the persistence-info magic and version,
/// rejects `FIRST`/`INVALID` record ids, and rejects any status not in the
/// 6-valued set.
pub fn validate_header(header: &RecordHeader) -> Result<(), HeaderValidation> {
    if header.signature_start != SIGNATURE_START
        || header.signature_end != SIGNATURE_END
    {
        return Err(HeaderValidation::BadSignature);
    }
    if header.revision != REVISION {
        return Err(HeaderValidation::BadVersion);
    }
    if header.persistence_info.signature != PERSISTENCE_SIGNATURE
        || header.persistence_info.major != PERSISTENCE_MAJOR
        || header.persistence_info.minor != PERSISTENCE_MINOR
    {
        return Err(HeaderValidation::BadPersistenceInfo);
    }
    if RecordHeader::is_reserved_id(header.record_id) {
        return Err(HeaderValidation::BadId);
    }
    if header.status().is_none() {
        return Err(HeaderValidation::BadStatus);
    }
    Ok(())
}

/// Validates the header and also enforces that it matches the caller's
/// expectations.
pub fn validate_record(
    header: &RecordHeader,
    expected_id: u64,
    expected_len: u32,
) -> Result<(), HeaderValidation> {
    validate_header(header)?;
    if header.record_id != expected_id || header.record_length != expected_len
    {
        return Err(HeaderValidation::BadId);
    }
    Ok(())
}

pub fn read_header(bytes: &[u8]) -> Option<RecordHeader> {
    RecordHeader::read_from(&bytes[..crate::header::HEADER_LEN])
}

impl Store {
    /// Writes exactly the one mutable status byte inside the record's
    /// header at its flash offset, refusing to create a second INCOMING or
    /// second OUTGOING, and keeping `incoming`/`outgoing` pointers in sync.
    pub(crate) fn write_cper_status(
        &mut self,
        new_status: RecordStatus,
        record_ref: RecordRef,
    ) -> Result<(), ErstError> {
        if new_status == RecordStatus::Incoming {
            if let Some(existing) = self.tracker.incoming() {
                if existing != record_ref {
                    return Err(ErstError::Unsupported);
                }
            }
        }
        if new_status == RecordStatus::Outgoing {
            if let Some(existing) = self.tracker.outgoing() {
                if existing != record_ref {
                    return Err(ErstError::Unsupported);
                }
            }
        }

        let offset = self.tracker.get(record_ref).record_offset;
        let byte = (new_status as u8).as_bytes().to_vec();
        self.trace_write(offset + STATUS_OFFSET_IN_HEADER as u32, 1);
        self.cache.write(
            self.flash.as_mut(),
            offset + STATUS_OFFSET_IN_HEADER as u32,
            &byte,
        )?;

        match new_status {
            RecordStatus::Incoming => self.tracker.set_incoming(Some(record_ref)),
            RecordStatus::Outgoing => self.tracker.set_outgoing(Some(record_ref)),
            RecordStatus::Valid => {
                if self.tracker.incoming() == Some(record_ref) {
                    self.tracker.set_incoming(None);
                }
            }
            RecordStatus::Deleted | RecordStatus::Invalid => {
                if self.tracker.incoming() == Some(record_ref) {
                    self.tracker.set_incoming(None);
                }
                if self.tracker.outgoing() == Some(record_ref) {
                    self.tracker.set_outgoing(None);
                }
            }
            RecordStatus::Free => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::PersistenceInfo;

    fn header(id: u64, status: RecordStatus) -> RecordHeader {
        RecordHeader {
            signature_start: SIGNATURE_START,
            revision: REVISION,
            signature_end: SIGNATURE_END,
            section_count: 1,
            error_severity: 0,
            validation_bits: 0,
            record_length: 128,
            timestamp: 0,
            platform_id: [0; 16],
            partition_id: [0; 16],
            creator_id: [0; 16],
            notification_type: [0; 16],
            record_id: id,
            flags: 0,
            persistence_info: PersistenceInfo::fresh(status),
            reserved: [0; 12],
        }
    }

    #[test]
    fn rejects_reserved_ids() {
        let h = header(erst_api::RECORD_ID_FIRST, RecordStatus::Valid);
        assert_eq!(validate_header(&h), Err(HeaderValidation::BadId));
    }

    #[test]
    fn accepts_well_formed_header() {
        let h = header(0x42, RecordStatus::Valid);
        assert!(validate_header(&h).is_ok());
    }

    #[test]
    fn validate_record_checks_id_and_length() {
        let h = header(0x42, RecordStatus::Valid);
        assert!(validate_record(&h, 0x42, 128).is_ok());
        assert!(validate_record(&h, 0x43, 128).is_err());
        assert!(validate_record(&h, 0x42, 64).is_err());
    }
}
