pub mod logistic;

pub use logistic::{Model, ModelLoader, PredictOutput, SymbolModel};
