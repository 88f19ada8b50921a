pub mod framework;
pub mod heat_transfer;
pub mod materials;
pub mod output;
pub mod run;
