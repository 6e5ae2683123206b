pub mod cli;
pub mod config;
pub mod distro;
pub mod domain_xml;
pub mod error;
pub mod image;
pub mod lineinfile;
pub mod machine;
pub mod provision;
pub mod remove;
pub mod retry;
pub mod seed;
pub mod virsh;
