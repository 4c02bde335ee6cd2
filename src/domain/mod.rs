pub mod catalog;
pub mod input;
pub mod models;
pub mod profiles;
pub mod scan;
pub mod settings;
pub mod shaper;
