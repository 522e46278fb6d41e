use std::fs::File;
use std::io::BufReader;

use serde::{Deserialize, Serialize};

use crate::utils::{Error, Result};

fn default_numchan() -> usize {
    num_cpus::get()
}
fn default_pile_block_size() -> usize {
    1 << 20
}
fn default_true() -> bool {
    true
}
fn default_relation_pass_limit() -> usize {
    64
}

/// Settings for a build. Every field may be left out of the JSON file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildOptions {
    /// Worker threads; 0 runs everything on the calling thread.
    #[serde(default = "default_numchan")]
    pub numchan: usize,

    /// Finest zoom used to place nodes. Defaults to the deepest catalog
    /// tile.
    #[serde(default)]
    pub max_zoom: Option<u32>,

    /// Bytes buffered per pile before a block is written out.
    #[serde(default = "default_pile_block_size")]
    pub pile_block_size: usize,

    /// Zlib compress pile and archive blocks.
    #[serde(default = "default_true")]
    pub compress_blocks: bool,

    /// Leave the pile data file in place when the store is dropped.
    #[serde(default)]
    pub keep_temps: bool,

    /// Upper bound on passes of the deferred relation loop.
    #[serde(default = "default_relation_pass_limit")]
    pub relation_pass_limit: usize,

    /// Write ghost way records into node piles outside a way's footprint.
    #[serde(default = "default_true")]
    pub ghost_ways: bool,

    /// `run_build` installs the console messenger, with progress bars.
    #[serde(default)]
    pub console_messages: bool,
}

impl Default for BuildOptions {
    fn default() -> BuildOptions {
        BuildOptions {
            numchan: default_numchan(),
            max_zoom: None,
            pile_block_size: default_pile_block_size(),
            compress_blocks: true,
            keep_temps: false,
            relation_pass_limit: default_relation_pass_limit(),
            ghost_ways: true,
            console_messages: false,
        }
    }
}

impl BuildOptions {
    pub fn from_file(fname: &str) -> Result<BuildOptions> {
        let opts: BuildOptions = serde_json::from_reader(BufReader::new(File::open(fname)?))?;
        opts.check()?;
        Ok(opts)
    }

    pub fn from_json(s: &str) -> Result<BuildOptions> {
        let opts: BuildOptions = serde_json::from_str(s)?;
        opts.check()?;
        Ok(opts)
    }

    pub fn check(&self) -> Result<()> {
        if self.pile_block_size == 0 {
            return Err(Error::InvalidInput(String::from(
                "pile_block_size must be positive",
            )));
        }
        if self.relation_pass_limit == 0 {
            return Err(Error::InvalidInput(String::from(
                "relation_pass_limit must be positive",
            )));
        }
        if let Some(z) = self.max_zoom {
            if z > crate::elements::MAX_ZOOM {
                return Err(Error::InvalidInput(format!("max_zoom {} too large", z)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let o = BuildOptions::from_json("{}").unwrap();
        assert_eq!(o, BuildOptions::default());
        assert_eq!(o.pile_block_size, 1 << 20);
        assert!(o.compress_blocks);
        assert!(o.ghost_ways);
        assert_eq!(o.relation_pass_limit, 64);
        assert_eq!(o.max_zoom, None);
    }

    #[test]
    fn test_partial_json() {
        let o = BuildOptions::from_json(r#"{"numchan": 0, "max_zoom": 12, "keep_temps": true}"#).unwrap();
        assert_eq!(o.numchan, 0);
        assert_eq!(o.max_zoom, Some(12));
        assert!(o.keep_temps);
        assert!(BuildOptions::from_json(r#"{"pile_block_size": 0}"#).is_err());
        assert!(BuildOptions::from_json(r#"{"max_zoom": 25}"#).is_err());
        assert!(BuildOptions::from_json("[").is_err());

        let s = serde_json::to_string(&o).unwrap();
        assert_eq!(BuildOptions::from_json(&s).unwrap(), o);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let fname = dir.path().join("options.json");
        std::fs::write(&fname, r#"{"ghost_ways": false}"#).unwrap();
        let o = BuildOptions::from_file(fname.to_str().unwrap()).unwrap();
        assert!(!o.ghost_ways);
        assert!(!o.console_messages);
        assert!(BuildOptions::from_file("/nonexistent/options.json").is_err());
    }
}
