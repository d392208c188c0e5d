use std::fmt;

/// Request kinds. The numeric codes are shared with `runtime/globals.js`
/// and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Open = 0,
    Copy = 1,
    Paste = 2,
    GetEnv = 3,
    Write = 4,
    Arg = 5,
    Hide = 6,
    Show = 7,
    Error = 8,
    ShowWidget = 9,
    ShowDevtools = 10,
    UpdateWidget = 11,
    UpdateErrorLoader = 12,
    SetTabData = 13,
    OnTab = 14,
    SetDivData = 15,
    SwitchTab = 16,
    GetPreview = 17,
    SetPreview = 18,
    Drop = 19,
    OnEvent = 20,
    CloseWidget = 21,
    StartDrag = 22,
    RunInEditor = 23,
    Textarea = 24,
    SendNotification = 25,
}

impl Channel {
    pub const ALL: [Channel; 26] = [
        Channel::Open,
        Channel::Copy,
        Channel::Paste,
        Channel::GetEnv,
        Channel::Write,
        Channel::Arg,
        Channel::Hide,
        Channel::Show,
        Channel::Error,
        Channel::ShowWidget,
        Channel::ShowDevtools,
        Channel::UpdateWidget,
        Channel::UpdateErrorLoader,
        Channel::SetTabData,
        Channel::OnTab,
        Channel::SetDivData,
        Channel::SwitchTab,
        Channel::GetPreview,
        Channel::SetPreview,
        Channel::Drop,
        Channel::OnEvent,
        Channel::CloseWidget,
        Channel::StartDrag,
        Channel::RunInEditor,
        Channel::Textarea,
        Channel::SendNotification,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u64) -> Option<Channel> {
        Self::ALL.get(usize::try_from(code).ok()?).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::Open => "OPEN",
            Channel::Copy => "COPY",
            Channel::Paste => "PASTE",
            Channel::GetEnv => "GET_ENV",
            Channel::Write => "WRITE",
            Channel::Arg => "ARG",
            Channel::Hide => "HIDE",
            Channel::Show => "SHOW",
            Channel::Error => "ERROR",
            Channel::ShowWidget => "SHOW_WIDGET",
            Channel::ShowDevtools => "SHOW_DEVTOOLS",
            Channel::UpdateWidget => "UPDATE_WIDGET",
            Channel::UpdateErrorLoader => "UPDATE_ERROR_LOADER",
            Channel::SetTabData => "SET_TAB_DATA",
            Channel::OnTab => "ON_TAB",
            Channel::SetDivData => "SET_DIV_DATA",
            Channel::SwitchTab => "SWITCH_TAB",
            Channel::GetPreview => "GET_PREVIEW",
            Channel::SetPreview => "SET_PREVIEW",
            Channel::Drop => "DROP",
            Channel::OnEvent => "ON_EVENT",
            Channel::CloseWidget => "CLOSE_WIDGET",
            Channel::StartDrag => "START_DRAG",
            Channel::RunInEditor => "RUN_IN_EDITOR",
            Channel::Textarea => "TEXTAREA",
            Channel::SendNotification => "SEND_NOTIFICATION",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
