//! Pure decision functions: FEFO consumption planning and three-way merge.
//! No I/O, no clock — engines feed them snapshots and apply their output.

pub mod fefo;
pub mod merge;
