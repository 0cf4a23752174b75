/*!
# fleetwatch devkit - doubles and harness for kernel tests

- `MockGateway`: records every post, update and ephemeral instead of calling Slack
- `ScriptedRunner`: answers probe and power commands from a per-address script
- `RecordingPreview`: counts console captures, answers with a fixed PNG
- `Timeline`: one ordered log shared by both doubles, to assert "card before command"
- `TestHarness`: a small fleet wired exactly like the real binary, minus the network
*/

pub mod gateway_stub;
pub mod preview_stub;
pub mod runner_stub;
pub mod test_utils;
pub mod timeline;

pub use gateway_stub::{MockGateway, SentKind, SentMessage};
pub use preview_stub::{RecordingPreview, PREVIEW_PNG};
pub use runner_stub::{Outcome, ScriptedRunner};
pub use test_utils::{HarnessBuilder, TestHarness};
pub use timeline::Timeline;
