//! Kernel command-line parsing.
//!
//! Whitespace-separated `key=value` options plus positional words;
//! everything after `--` goes to init untouched.

use log::LevelFilter;

use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct KCmdlineArg {
    options: BTreeMap<String, String>,
    init_args: Vec<String>,
}

impl KCmdlineArg {
    pub fn parse(raw: &str) -> Self {
        let mut options = BTreeMap::new();
        let mut init_args = Vec::new();
        let mut for_init = false;
        for word in raw.split_whitespace() {
            if word == "--" {
                for_init = true;
                continue;
            }
            if for_init {
                init_args.push(String::from(word));
                continue;
            }
            match word.split_once('=') {
                Some((key, value)) => {
                    options.insert(String::from(key), String::from(value));
                }
                None => {
                    options.insert(String::from(word), String::new());
                }
            }
        }
        Self { options, init_args }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn init_args(&self) -> &[String] {
        &self.init_args
    }

    /// `root=` names the root block device node.
    pub fn root(&self) -> Option<&str> {
        self.get("root")
    }

    /// `init=` overrides the first program; /sbin/init otherwise.
    pub fn init_path(&self) -> &str {
        self.get("init").unwrap_or("/sbin/init")
    }

    /// `console=` picks the boot console device.
    pub fn console(&self) -> Option<&str> {
        self.get("console")
    }

    /// `loglevel=` 0..=5 maps onto the log facade's filters.
    pub fn loglevel(&self) -> LevelFilter {
        match self.get("loglevel").and_then(|v| v.parse::<u8>().ok()) {
            Some(0) => LevelFilter::Off,
            Some(1) => LevelFilter::Error,
            Some(2) => LevelFilter::Warn,
            Some(3) => LevelFilter::Info,
            Some(4) => LevelFilter::Debug,
            Some(5) => LevelFilter::Trace,
            _ => LevelFilter::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_and_init_args_split() {
        let args =
            KCmdlineArg::parse("root=/dev/ram0 loglevel=4 quiet init=/bin/sh -- -l foo");
        assert_eq!(args.root(), Some("/dev/ram0"));
        assert_eq!(args.loglevel(), LevelFilter::Debug);
        assert_eq!(args.init_path(), "/bin/sh");
        assert_eq!(args.get("quiet"), Some(""));
        assert_eq!(args.init_args(), ["-l", "foo"]);
    }

    #[test]
    fn defaults_without_options() {
        let args = KCmdlineArg::parse("");
        assert_eq!(args.init_path(), "/sbin/init");
        assert_eq!(args.loglevel(), LevelFilter::Info);
        assert!(args.root().is_none());
    }
}
