//! Core fields, operators, solvers and inference pipelines for Bayesian
//! signal reconstruction on regular grids.

pub mod backend;
pub mod cg;
pub mod controller;
pub mod covariance;
pub mod datagen;
pub mod field;
pub mod grid;
pub mod hamiltonian;
pub mod harmonic;
pub mod io;
pub mod kl;
pub mod likelihood;
pub mod metrics;
pub mod model;
pub mod newton;
pub mod operator;
pub mod reconstruction;
pub mod response;
pub mod sampling;
pub mod spectrum;
pub mod storage;
pub mod wiener;


#[cfg(test)]
mod _tests_cg;
#[cfg(test)]
mod _tests_field;
#[cfg(test)]
mod _tests_grid;
#[cfg(test)]
mod _tests_kl;
#[cfg(test)]
mod _tests_likelihood;
#[cfg(test)]
mod _tests_reconstruction;
#[cfg(test)]
mod _tests_storage;
