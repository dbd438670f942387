pub mod run;
pub mod task;
pub mod vacancy;
