// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use num_derive::FromPrimitive;

/// The doorbell operation word, per the ACPI ERST "Action" codes.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
pub enum Operation {
    Invalid = 0,
    BeginRead = 1,
    BeginWrite = 2,
    BeginClear = 3,
    DummyWrite = 4,
    End = 5,
    Execute = 6,
    CheckBusy = 7,
    GetStatus = 8,
}

impl From<Operation> for u32 {
    fn from(op: Operation) -> Self {
        op as u32
    }
}
