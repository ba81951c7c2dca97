use std::path::PathBuf;

pub const SERVICE_NAME: &str = "bonbast-bot";
pub const DEFAULT_UNIT_PATH: &str = "/etc/systemd/system/bonbast-bot.service";
pub const RESTART_SEC: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub name: String,
    pub description: String,
    pub working_directory: PathBuf,
    pub environment_file: PathBuf,
    pub interpreter: PathBuf,
    pub entry_point: PathBuf,
    pub restart_sec: u32,
}

impl ServiceUnit {
    pub fn exec_start(&self) -> String {
        format!(
            "{} {}",
            self.interpreter.display(),
            self.entry_point.display()
        )
    }

    pub fn render(&self) -> String {
        format!(
            "[Unit]
Description={description}
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
WorkingDirectory={working_directory}
EnvironmentFile={environment_file}
ExecStart={exec_start}
Restart=always
RestartSec={restart_sec}

[Install]
WantedBy=multi-user.target
",
            description = self.description,
            working_directory = self.working_directory.display(),
            environment_file = self.environment_file.display(),
            exec_start = self.exec_start(),
            restart_sec = self.restart_sec,
        )
    }
}
