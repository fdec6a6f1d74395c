pub mod dmv;
