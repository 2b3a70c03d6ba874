use std::fs;
use std::path::{Path, PathBuf};

use hbn_qc_core::pipeline::{PipelineInputs, Stage};
use hbn_qc_core::{QcConfig, SubjectFilter, run};
use tempfile::TempDir;

struct Fixture {
    _td: TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let td = TempDir::new().unwrap();
        let root = td.path().to_path_buf();
        for dir in ["bids", "fmriprep", "logs"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        Fixture { _td: td, root }
    }

    fn write(&self, rel: &str, content: &[u8]) {
        let path = self.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn job_log(&self, name: &str, label: &str, bytes: usize) {
        let line = format!("Running fmriprep --participant_label {label} --fs-no-reconall\n");
        let mut content = line.into_bytes();
        assert!(content.len() <= bytes);
        content.resize(bytes, b'.');
        self.write(&format!("logs/{name}"), &content);
    }

    fn confounds(&self, subject: &str, task: &str, fd: &[&str]) {
        let mut body = String::from("global_signal\tframewise_displacement\n");
        for v in fd {
            body.push_str(&format!("0.0\t{v}\n"));
        }
        self.write(
            &format!("fmriprep/{subject}/func/{subject}_task-{task}_desc-confounds_timeseries.tsv"),
            body.as_bytes(),
        );
    }

    fn inputs(&self, out: &str) -> PipelineInputs {
        PipelineInputs::new(
            self.root.join("bids"),
            self.root.join("fmriprep"),
            self.root.join("logs"),
            self.root.join(out),
        )
    }

    fn read(&self, out: &str, file: &str) -> String {
        fs::read_to_string(self.root.join(out).join(file)).unwrap()
    }
}

/// Three subjects with different evidence in every tree.
fn populated() -> Fixture {
    let fx = Fixture::new();
    // raw data
    fx.write(
        "bids/participants.tsv",
        b"participant_id\tsex\n\
          sub-NDARAA000001\tF\n\
          sub-NDARAA000002\tM\n\
          sub-NDARAA000004\tF\n",
    );
    fx.write("bids/sub-NDARAA000001/anat/sub-NDARAA000001_T1w.nii.gz", b"");
    fx.write("bids/sub-NDARAA000001/fmap/sub-NDARAA000001_dir-AP_fMRI_epi.nii.gz", b"");
    fx.write("bids/sub-NDARAA000001/func/sub-NDARAA000001_task-rest_bold.nii.gz", b"");
    fx.write("bids/sub-NDARAA000002/anat/sub-NDARAA000002_T1w.nii.gz", b"");
    // fmriprep outputs
    fx.write("fmriprep/sub-NDARAA000001.html", b"<html/>");
    fx.confounds("sub-NDARAA000001", "rest", &["n/a", "0.1", "0.1"]);
    fx.confounds("sub-NDARAA000002", "rest", &["n/a", "0.1", "0.3"]);
    fx.confounds("sub-NDARAA000003", "rest", &["n/a", "2.0", "2.0"]);
    fx.confounds("sub-NDARAA000003", "movie", &["n/a", "0.5"]);
    // job logs
    fx.job_log("fmriprep-1.out", "NDARAA000001", 4_500_000);
    fx.job_log("fmriprep-2.out", "NDARAA000002", 2_000);
    fx.job_log("fmriprep-3.out", "NDARAA000002", 20_000);
    fx.job_log("broken.out", "xxxx", 100);
    fx
}

#[test]
fn full_run_writes_every_table() {
    let fx = populated();
    let report = run(&fx.inputs("qc"), &QcConfig::default()).unwrap();
    assert!(report.succeeded(), "{report}");

    for file in [
        "BIDS-count_all.csv",
        "BIDS-count_exclude.csv",
        "BIDS-count_include.csv",
        "html-check_all.csv",
        "html-check_no.csv",
        "html-check_yes.csv",
        "out-size_all.csv",
        "out-size_incomp.csv",
        "out-size_comp.csv",
        "motion-outliers_all.csv",
        "qc-summary_all.csv",
    ] {
        assert!(fx.root.join("qc").join(file).is_file(), "missing {file}");
    }

    assert_eq!(
        fx.read("qc", "BIDS-count_all.csv"),
        "participant_id,t1,t1_files,func,func_files,fmap,fmap_files\n\
         sub-NDARAA000001,yes,1,yes,1,yes,1\n\
         sub-NDARAA000002,yes,1,,,,\n"
    );
    assert_eq!(
        fx.read("qc", "BIDS-count_exclude.csv"),
        "participant_id,t1,t1_files,func,func_files,fmap,fmap_files\n\
         sub-NDARAA000002,yes,1,,,,\n"
    );
    assert_eq!(
        fx.read("qc", "html-check_no.csv"),
        "participant_id,sex,html\nsub-NDARAA000002,M,no\nsub-NDARAA000004,F,no\n"
    );
    assert_eq!(
        fx.read("qc", "out-size_all.csv"),
        "participant_id,log_file,n_logs,size_kb,status\n\
         sub-NDARAA000001,fmriprep-1.out,1,4500.000,likely complete\n\
         sub-NDARAA000002,fmriprep-3.out,2,20.000,partial/error\n"
    );
    assert_eq!(
        fx.read("qc", "motion-outliers_all.csv"),
        "participant_id,movie_is_outlier,rest_is_outlier\n\
         sub-NDARAA000001,,false\n\
         sub-NDARAA000002,,false\n\
         sub-NDARAA000003,false,false\n"
    );

    let jobs = report.stage(Stage::Jobs).unwrap();
    assert_eq!(jobs.rows, 2);
    assert_eq!(jobs.dropped, 1);
}

#[test]
fn summary_is_union_of_subjects() {
    let fx = populated();
    let report = run(&fx.inputs("qc"), &QcConfig::default()).unwrap();
    // 001, 002 everywhere; 003 only in motion; 004 only in the registry
    assert_eq!(report.stage(Stage::Summary).unwrap().rows, 4);

    let summary = fx.read("qc", "qc-summary_all.csv");
    let mut lines = summary.lines();
    assert_eq!(
        lines.next().unwrap(),
        "participant_id,t1,t1_files,func,func_files,fmap,fmap_files,sex,html,\
         log_file,n_logs,size_kb,status,movie_is_outlier,rest_is_outlier"
    );
    let row3 = summary.lines().find(|l| l.starts_with("sub-NDARAA000003")).unwrap();
    assert_eq!(row3, "sub-NDARAA000003,,,,,,,,,,,,,false,false");
    let row4 = summary.lines().find(|l| l.starts_with("sub-NDARAA000004")).unwrap();
    assert_eq!(row4, "sub-NDARAA000004,,,,,,,F,no,,,,,,");
}

#[test]
fn rerun_is_byte_identical() {
    let fx = populated();
    run(&fx.inputs("qc1"), &QcConfig::default()).unwrap();
    run(&fx.inputs("qc2"), &QcConfig::default()).unwrap();
    let mut names: Vec<_> = fs::read_dir(fx.root.join("qc1"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    names.sort();
    assert_eq!(names.len(), 11);
    for name in names {
        let a = fs::read(fx.root.join("qc1").join(&name)).unwrap();
        let b = fs::read(fx.root.join("qc2").join(&name)).unwrap();
        assert_eq!(a, b, "{name:?} differs between runs");
    }
}

#[test]
fn missing_registry_fails_only_the_completion_stage() {
    let fx = populated();
    assert!(run(&fx.inputs("qc"), &QcConfig::default()).unwrap().succeeded());
    assert!(fx.root.join("qc/html-check_no.csv").exists());

    fs::remove_file(fx.root.join("bids/participants.tsv")).unwrap();
    let report = run(&fx.inputs("qc"), &QcConfig::default()).unwrap();
    assert!(!report.succeeded());

    let failed: Vec<Stage> = report.failures().map(|s| s.stage).collect();
    assert_eq!(failed, [Stage::Completion]);
    let err = report.stage(Stage::Completion).unwrap().error.as_deref().unwrap();
    assert!(err.contains("participants.tsv"), "{err}");

    for view in ["all", "no", "yes"] {
        assert!(!fx.root.join(format!("qc/html-check_{view}.csv")).exists(), "stale {view} view");
    }
    assert!(!fx.read("qc", "qc-summary_all.csv").contains("html"));
    assert!(fx.root.join("qc/motion-outliers_all.csv").exists());
    // 001-003 remain without the registry-only subject
    assert_eq!(report.stage(Stage::Summary).unwrap().rows, 3);
}

#[test]
fn malformed_confound_name_fails_motion_stage() {
    let fx = populated();
    fx.write(
        "fmriprep/sub-NDARAA000001/func/\
         sub-NDARAA000001_task-rest_space-MNI_desc-confounds_timeseries.tsv",
        b"x\n",
    );
    let report = run(&fx.inputs("qc"), &QcConfig::default()).unwrap();

    let motion = report.stage(Stage::Motion).unwrap();
    assert!(!motion.ok);
    assert!(!fx.root.join("qc/motion-outliers_all.csv").exists());
    assert!(motion.error.as_deref().unwrap().contains("space-MNI"));
    assert!(report.stage(Stage::Jobs).unwrap().ok);
    assert!(fx.root.join("qc/out-size_all.csv").exists());
}

#[test]
fn subject_list_restricts_every_component() {
    let fx = populated();
    let mut inputs = fx.inputs("qc");
    inputs.subjects = SubjectFilter::parse_list("sub-NDARAA000002\n").unwrap();
    let report = run(&inputs, &QcConfig::default()).unwrap();
    assert!(report.succeeded());
    for stage in [Stage::Presence, Stage::Completion, Stage::Jobs, Stage::Motion, Stage::Summary] {
        assert_eq!(report.stage(stage).unwrap().rows, 1, "{stage}");
    }
}

#[test]
fn minimal_presence_scenario() {
    let fx = Fixture::new();
    fx.write("bids/participants.tsv", b"participant_id\nsub-001\n");
    fx.write("bids/sub-001/anat/sub-001_T1w.nii.gz", b"");
    fx.write("bids/sub-001/fmap/sub-001_fMRI_epi.nii.gz", b"");
    let report = run(&fx.inputs("qc"), &QcConfig::default()).unwrap();
    assert!(report.succeeded());
    assert_eq!(
        fx.read("qc", "BIDS-count_all.csv"),
        "participant_id,t1,t1_files,fmap,fmap_files\nsub-001,yes,1,yes,1\n"
    );
    assert_eq!(
        fx.read("qc", "BIDS-count_exclude.csv"),
        "participant_id,t1,t1_files,fmap,fmap_files\n"
    );
}

#[test]
fn small_job_log_is_not_started() {
    let fx = Fixture::new();
    fx.write("bids/participants.tsv", b"participant_id\n");
    fx.job_log("job.out", "sub-NDAAB1234CD", 5000);
    let report = run(&fx.inputs("qc"), &QcConfig::default()).unwrap();
    assert!(report.succeeded());
    assert_eq!(
        fx.read("qc", "out-size_incomp.csv"),
        "participant_id,log_file,n_logs,size_kb,status\nsub-NDAAB123,job.out,1,5.000,not started\n"
    );
}

#[test]
fn config_file_changes_thresholds() {
    let fx = populated();
    let config_path: &Path = &fx.root.join("qc.toml");
    fs::write(config_path, "[jobs]\ncompleted_threshold_kb = 15.0\n").unwrap();
    let config = QcConfig::load(config_path).unwrap();
    run(&fx.inputs("qc"), &config).unwrap();
    assert_eq!(
        fx.read("qc", "out-size_incomp.csv"),
        "participant_id,log_file,n_logs,size_kb,status\n"
    );
}

#[test]
fn report_serializes_to_json() {
    let fx = populated();
    let report = run(&fx.inputs("qc"), &QcConfig::default()).unwrap();
    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    let stages = json["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 5);
    assert_eq!(stages[0]["stage"], "presence");
    assert_eq!(stages[4]["ok"], true);
    assert!(stages[0].get("error").is_none());
}
