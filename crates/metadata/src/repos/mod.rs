//! Repository traits for metadata operations.

pub mod files;
pub mod quotas;
pub mod uploads;

pub use files::FileRepo;
pub use quotas::QuotaRepo;
pub use uploads::UploadRepo;
