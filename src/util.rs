//! Filesystem plumbing around profile directories.

use std::path::{ Path, PathBuf };
use std::time::{ Duration, Instant };

use serde::{ Deserialize, Serialize };

use crate::stats::CurveMatrix;
use crate::{ Error, Result };

/// Capture settings recorded alongside a reference profile. Required
/// before any bandwidth metric can be computed from that profile.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TargetConfigs {
    /// TSC frequency of the machine the reference was captured on, in MHz.
    pub tsc_freq_mhz: u64,
}

impl TargetConfigs {
    pub const FILENAME: &'static str = "target_configs.json";

    pub fn read(profile_dir: &Path) -> Result<Self> {
        let path = profile_dir.join(Self::FILENAME);
        if !path.exists() {
            return Err(Error::Configuration(format!(
                "{} not present in the target directory {}",
                Self::FILENAME, profile_dir.display()
            )));
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::io(&path, e))?;
        serde_json::from_str(&text).map_err(|e| {
            Error::Configuration(format!(
                "malformed {}: {}", path.display(), e
            ))
        })
    }

    pub fn write(&self, profile_dir: &Path) -> Result<()> {
        let path = profile_dir.join(Self::FILENAME);
        let text = serde_json::to_string_pretty(self).expect("serializable");
        std::fs::write(&path, text).map_err(|e| Error::io(&path, e))
    }
}

/// The files belonging to one profiled hardware thread within a profile
/// directory.
#[derive(Clone, Debug)]
pub struct ThreadCapture {
    pub tid: u32,
    /// The canonical counters CSV.
    pub counters: PathBuf,
    /// Miss-rate and IPC curve files, when a curve sweep ran.
    pub curves: Option<(PathBuf, PathBuf)>,
}

/// Extract the profiled tid from one of the conventional capture
/// filenames (`<run>_grouped_counters_<tid>.csv`, `<run>_mrc_<tid>`,
/// `<run>_ipc_<tid>`).
pub fn tid_from_filename(name: &str) -> Result<u32> {
    let tid = if let Some(pos) = name.rfind("_mrc_") {
        &name[pos + "_mrc_".len()..]
    } else if let Some(pos) = name.rfind("_ipc_") {
        &name[pos + "_ipc_".len()..]
    } else if let Some(pos) = name.rfind("_grouped_counters_") {
        let rest = &name[pos + "_grouped_counters_".len()..];
        rest.strip_suffix(".csv").unwrap_or(rest)
    } else {
        return Err(Error::Configuration(format!(
            "not a capture filename: {:?}", name
        )));
    };
    tid.parse().map_err(|_| {
        Error::Configuration(format!(
            "capture filename {:?} has a non-numeric tid", name
        ))
    })
}

/// Discover the per-thread captures in a profile directory.
///
/// Files are paired per thread in sorted filename order, which is the
/// capture order; reference and candidate directories produced by the
/// same profiling setup therefore pair up thread-by-thread.
pub fn discover_profile_dir(dir: &Path) -> Result<Vec<ThreadCapture>> {
    let mut counters: Vec<String> = Vec::new();
    let mut mrcs: Vec<String> = Vec::new();
    let mut ipcs: Vec<String> = Vec::new();

    for entry in std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.contains("_grouped_counters_") && name.ends_with(".csv") {
            counters.push(name);
        } else if name.contains("_mrc_") {
            mrcs.push(name);
        } else if name.contains("_ipc_") {
            ipcs.push(name);
        }
    }
    counters.sort();
    mrcs.sort();
    ipcs.sort();

    if counters.is_empty() {
        return Err(Error::io(dir, std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no grouped-counters captures found",
        )));
    }

    let with_curves = if mrcs.is_empty() && ipcs.is_empty() {
        false
    } else if mrcs.len() == counters.len() && ipcs.len() == counters.len() {
        true
    } else {
        return Err(Error::Configuration(format!(
            "{}: {} counter captures but {} mrc / {} ipc curve files",
            dir.display(), counters.len(), mrcs.len(), ipcs.len()
        )));
    };

    let mut captures = Vec::with_capacity(counters.len());
    for (idx, name) in counters.iter().enumerate() {
        let tid = tid_from_filename(name)?;
        let curves = if with_curves {
            let mrc = &mrcs[idx];
            let ipc = &ipcs[idx];
            // The curve files of one thread must agree on the tid.
            if tid_from_filename(mrc)? != tid_from_filename(ipc)? {
                return Err(Error::Configuration(format!(
                    "curve files {:?} and {:?} belong to different threads",
                    mrc, ipc
                )));
            }
            Some((dir.join(mrc), dir.join(ipc)))
        } else {
            None
        };
        captures.push(ThreadCapture {
            tid,
            counters: dir.join(name),
            curves,
        });
    }
    Ok(captures)
}

/// Load a whitespace-separated curve matrix (rows = phases, columns =
/// associativity ways).
pub fn load_curve_matrix(path: &Path) -> Result<CurveMatrix> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::io(path, e))?;
    CurveMatrix::parse(&text)
}

/// Block until an external collaborator signals completion by creating
/// the sentinel file.
pub fn wait_for_sentinel(
    path: &Path,
    poll: Duration,
    timeout: Option<Duration>,
) -> Result<()> {
    let start = Instant::now();
    while !path.exists() {
        if let Some(limit) = timeout {
            if start.elapsed() > limit {
                return Err(Error::io(path, std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "sentinel never appeared",
                )));
            }
        }
        std::thread::sleep(poll);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn tmpdir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("counterpart-util-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn tids_come_from_the_conventional_names() {
        assert_eq!(
            tid_from_filename("3_grouped_counters_4521.csv").unwrap(), 4521
        );
        assert_eq!(tid_from_filename("3_mrc_4521").unwrap(), 4521);
        assert_eq!(tid_from_filename("3_ipc_4521").unwrap(), 4521);
        assert!(tid_from_filename("cost.out").is_err());
        assert!(tid_from_filename("3_mrc_abc").is_err());
    }

    #[test]
    fn discovery_pairs_files_per_thread_in_sorted_order() {
        let dir = tmpdir("discover");
        for name in [
            "0_grouped_counters_100.csv", "0_grouped_counters_200.csv",
            "0_mrc_100", "0_mrc_200",
            "0_ipc_100", "0_ipc_200",
            "cost.out",
        ] {
            std::fs::write(dir.join(name), "").unwrap();
        }
        let captures = discover_profile_dir(&dir).unwrap();
        assert_eq!(captures.len(), 2);
        assert_eq!(captures[0].tid, 100);
        assert_eq!(captures[1].tid, 200);
        assert!(captures[0].curves.is_some());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn curveless_directories_discover_without_curves() {
        let dir = tmpdir("nocurves");
        std::fs::write(dir.join("0_grouped_counters_42.csv"), "").unwrap();
        let captures = discover_profile_dir(&dir).unwrap();
        assert_eq!(captures.len(), 1);
        assert!(captures[0].curves.is_none());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn inconsistent_curve_files_are_fatal() {
        let dir = tmpdir("ragged");
        std::fs::write(dir.join("0_grouped_counters_42.csv"), "").unwrap();
        std::fs::write(dir.join("0_mrc_42"), "").unwrap();
        let err = discover_profile_dir(&dir).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_directory_is_an_io_error() {
        let dir = tmpdir("empty");
        let err = discover_profile_dir(&dir).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn target_configs_round_trip() {
        let dir = tmpdir("tcfg");
        TargetConfigs { tsc_freq_mhz: 3400 }.write(&dir).unwrap();
        let back = TargetConfigs::read(&dir).unwrap();
        assert_eq!(back.tsc_freq_mhz, 3400);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_target_configs_is_a_configuration_error() {
        let dir = tmpdir("notcfg");
        let err = TargetConfigs::read(&dir).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn sentinel_wait_returns_once_the_file_exists() {
        let dir = tmpdir("sentinel");
        let sentinel = dir.join("done");
        let waiter = {
            let sentinel = sentinel.clone();
            std::thread::spawn(move || {
                wait_for_sentinel(
                    &sentinel,
                    Duration::from_millis(5),
                    Some(Duration::from_secs(5)),
                )
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(&sentinel, "").unwrap();
        waiter.join().unwrap().unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn sentinel_wait_times_out() {
        let dir = tmpdir("sentinel-timeout");
        let err = wait_for_sentinel(
            &dir.join("never"),
            Duration::from_millis(1),
            Some(Duration::from_millis(10)),
        ).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
