// Copyright (C) 2025 Preview Platform Team (platform@drape.dev)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#[cfg(test)]
mod tests {
    use super::*;
    use preview_core::agent::{quote_shell_arg, ExecCommand};

    #[test]
    fn simple_args_are_not_quoted() {
        assert_eq!(quote_shell_arg("npm"), "npm");
        assert_eq!(quote_shell_arg("install"), "install");
        assert_eq!(quote_shell_arg("--prefer-offline"), "--prefer-offline");
    }

    #[test]
    fn dangerous_args_are_single_quoted() {
        assert_eq!(quote_shell_arg("hello world"), "'hello world'");
        assert_eq!(quote_shell_arg("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn embedded_single_quotes_are_escaped() {
        assert_eq!(quote_shell_arg("it's"), "'it'\\''s'");
    }

    #[test]
    fn render_joins_quoted_argv() {
        let cmd = ExecCommand::new(vec!["echo", "hi there"]);
        assert_eq!(cmd.render(), "echo 'hi there'");
    }
}
