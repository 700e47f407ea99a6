pub mod engine;

pub use engine::{IqReply, MockEngine, MockServer, PubSubCall};

pub mod fixtures {
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    use parley_core::event::RosterItem;
    use parley_xmpp::Stanza;
    use serde::Deserialize;

    pub fn root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("tests")
            .join("fixtures")
    }

    pub fn path(relative: impl AsRef<Path>) -> PathBuf {
        root().join(relative.as_ref())
    }

    pub fn read(relative: impl AsRef<Path>) -> io::Result<String> {
        fs::read_to_string(path(relative))
    }

    pub fn stanza(name: &str) -> String {
        read_or_panic(Path::new("stanzas").join(name))
    }

    pub fn parsed_stanza(name: &str) -> Stanza {
        let raw = stanza(name);
        Stanza::parse(raw.as_bytes())
            .unwrap_or_else(|error| panic!("fixture {name} is not a valid stanza: {error}"))
    }

    pub fn roster(name: &str) -> Vec<RosterItem> {
        #[derive(Deserialize)]
        struct RosterFile {
            #[serde(default)]
            item: Vec<RosterItem>,
        }

        let raw = read_or_panic(Path::new("roster").join(name));
        toml::from_str::<RosterFile>(&raw)
            .unwrap_or_else(|error| panic!("fixture {name} is not a valid roster: {error}"))
            .item
    }

    pub fn config(name: &str) -> String {
        read_or_panic(Path::new("config").join(name))
    }

    fn read_or_panic(relative: impl AsRef<Path>) -> String {
        let relative = relative.as_ref();
        read(relative).unwrap_or_else(|error| {
            panic!(
                "failed to read fixture {}: {error}",
                relative.to_string_lossy()
            )
        })
    }
}
