pub mod policy;
pub mod resident;
