//! Structured object projection integration tests
//!
//! This module tests whole-structure operations of `CrdtObject` and field access
//! through `StructuredView` and `ArrayView`.

mod projection_tests;
