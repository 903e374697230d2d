pub mod capture;
pub mod packet;
