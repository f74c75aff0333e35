#![doc = include_str!("../../../README.md")]

mod compile;
mod error;
mod fragment;
mod mangle;
mod scope;
mod sexp;

pub use crate::{
    compile::{CompileOptions, Compiler, compile},
    error::CompileError,
    fragment::Fragment,
    sexp::{Level, Node, NodeKind, Sexp},
};
