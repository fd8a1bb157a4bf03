// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use std::process::ExitCode;
use treetest_cli::TreetestApp;

fn main() -> ExitCode {
    // Install the panic/error report handler for unexpected failures;
    // expected failures go through ExpectedError below.
    let _ = color_eyre::install();

    let app = TreetestApp::parse();
    match app.exec() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error.display_to_stderr();
            ExitCode::from(error.process_exit_code() as u8)
        }
    }
}
