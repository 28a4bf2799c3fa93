pub mod period;
pub mod settings;
pub mod shuffle;
pub mod sync;
pub mod task;
