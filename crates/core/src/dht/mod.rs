#![warn(missing_docs)]
//! Implementation of the chord ring.
//! ref: <https://pdos.csail.mit.edu/papers/ton:chord/paper-ton.pdf>
//!
//! There is no finger table. Lookups walk successor lists, so a lookup in a ring of N
//! vnodes with successor lists of length s takes up to N / s hops. The hop budget in
//! [LookupMetaData] bounds that walk.

mod chord;
pub mod did;
mod ring;
mod stabilization;
/// Successor list of a vnode.
pub mod successor;
pub mod types;
/// Vnode references and lookup metadata.
pub mod vnode;

pub use chord::LocalVnode;
pub use did::Did;
pub use did::HashFunction;
pub use did::SortRing;
pub use ring::Ring;
pub use stabilization::Stabilizer;
pub use successor::SuccessorSeq;
pub use types::Delegate;
pub use types::DelegateEvent;
pub use vnode::LookupMetaData;
pub use vnode::Vnode;
