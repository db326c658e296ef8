//! Integration tests for tokosync-remote
//!
//! Uses wiremock to stand in for the tree store and the table store and
//! verifies the requests each client sends and how it reads the replies.

mod common;

mod test_table;
mod test_tree;
