pub mod curate;
pub mod doctor;
pub mod feed;
pub mod session;
pub mod stats;
