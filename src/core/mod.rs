pub mod classify;
pub mod rollup;
pub mod run;
