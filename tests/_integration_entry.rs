// SPDX-License-Identifier: AGPL-3.0-or-later

#![allow(clippy::all)]

mod integration_tests {
    pub mod common;

    pub mod activation_and_reads;
    pub mod change_and_commands;
    pub mod describe_and_ping;
}
