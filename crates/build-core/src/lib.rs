pub mod crds;
pub mod determiners;
pub mod formatters;
pub mod generator;
pub mod implementations;
pub mod manifests;
pub mod models;
