//! End-to-end tests spanning the qcal crates live under `tests/`.
