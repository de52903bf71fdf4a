//! The effect graph surface: the [`Effect`](crate::Effect) trait and the
//! descriptor types its query actions exchange with the scheduler.

pub mod effect;
