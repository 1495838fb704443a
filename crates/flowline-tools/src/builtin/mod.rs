pub mod calc;
pub mod gdp;
pub mod guitar_search;
