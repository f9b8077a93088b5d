pub mod parse;
pub mod run;
pub mod serve;
pub mod status;
pub mod tools;
