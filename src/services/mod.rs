pub mod events;
pub mod extraction;
pub mod fwc;
pub mod memory;
pub mod processor;
pub mod reaper;
pub mod reservation;
pub mod results;
pub mod retry;
pub mod shutdown;
pub mod store;
pub mod worker;
