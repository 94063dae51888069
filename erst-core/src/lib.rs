// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A fault-tolerant, log-structured record store over a raw NOR-like
//! block device, built around a single [`store::Store`] value passed by
//! exclusive reference into every operation rather than reached through a
//! global singleton.
//!
//! Module layout mirrors the components named in the Flash
//! Adapter and Shadow Cache ([`flash`]), the Pool Allocator ([`pool`]), the
//! Record Tracker ([`tracker`]), the Block Manager ([`block`]), the Record
//! Codec ([`codec`]), the Write Engine ([`write`]), the Recovery Engine
//! ([`recovery`]), and the Mailbox Handler ([`mailbox`]). All but the last
//! three are implemented as additional `impl Store` blocks rather than as
//! separate owning structs, so they share `Store`'s state without passing
//! multiple mutable borrows between sibling components.

mod api;
mod block;
mod codec;
mod flash;
mod header;
mod mailbox;
mod pool;
mod recovery;
mod sim_flash;
mod store;
#[cfg(test)]
mod test_support;
mod tracker;
mod trace;
mod write;

pub use api::format_record;
pub use block::BlockInfoEntry;
pub use flash::{FlashAttributes, FlashDevice, FlashGeometry};
pub use header::HEADER_LEN;
pub use mailbox::{Doorbell, MailboxHandler};
pub use sim_flash::SimFlash;
pub use store::Store;
pub use trace::{Event, RecoveryDecision, Trace};
