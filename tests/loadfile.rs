use std::collections::BTreeMap;
use std::fs;

use camino::Utf8PathBuf;

use gdctools::config::DEFAULT_MISSING_FILE_VALUE;
use gdctools::dice::{DicedRow, write_diced_metadata};
use gdctools::domain::{Datestamp, LoadfileFormat};
use gdctools::loadfile::{
    BLACKLIST_FILTER, Loadfile, LoadfileOptions, REPLICATE_FILTER, SampleRecord,
    build_cohort_table, sample_set_rows,
};
use gdctools::store::DiceLayout;

fn row(case: &str, barcode: &str, sample_type: &str, annotation: &str, path: &str) -> DicedRow {
    DicedRow {
        case_id: case.to_string(),
        tcga_barcode: barcode.to_string(),
        sample_type: sample_type.to_string(),
        annotation: annotation.to_string(),
        file_name: path.to_string(),
        center: String::new(),
        platform: String::new(),
        report_type: String::new(),
        is_ffpe: "False".to_string(),
    }
}

fn ffpe(mut row: DicedRow) -> DicedRow {
    row.is_ffpe = "True".to_string();
    row
}

#[test]
fn sample_set_rows_for_regular_and_ffpe_samples() {
    let record = SampleRecord {
        sample_id: "TCGA-COAD-AB-0001-TP".to_string(),
        case_id: "TCGA-AB-0001".to_string(),
        sample_type: "TP".to_string(),
        set_cohort: "TCGA-COAD".to_string(),
        ..SampleRecord::default()
    };
    assert_eq!(
        sample_set_rows(&record, None),
        vec![
            ("TCGA-COAD-TP".to_string(), "TCGA-COAD-AB-0001-TP".to_string()),
            ("TCGA-COAD".to_string(), "TCGA-COAD-AB-0001-TP".to_string()),
        ]
    );

    let rows = [ffpe(row(
        "TCGA-AB-0001",
        "TCGA-AB-0001-01A-11D-A000-01",
        "TP",
        "CNV__snp6",
        "/dice/a.seg.txt",
    ))];
    let table = build_cohort_table(
        "TCGA",
        "TCGA-COAD",
        &rows,
        LoadfileFormat::Firecloud,
        &[],
    );
    let record = &table.samples["TCGA-COADFFPE-AB-0001-FFPE"];
    assert_eq!(record.sample_type, "FFPE");
    assert_eq!(
        sample_set_rows(record, None),
        vec![(
            "TCGA-COADFFPE-FFPE".to_string(),
            "TCGA-COADFFPE-AB-0001-FFPE".to_string()
        )]
    );
}

#[test]
fn case_level_files_fill_every_sample_of_the_case() {
    let rows = [
        row("TCGA-AB-0001", "TCGA-AB-0001-01A-11D-A000-01", "TP", "CNV__snp6", "/d/tp.seg.txt"),
        row("TCGA-AB-0001", "TCGA-AB-0001-11A-01D-A000-01", "NT", "CNV__snp6", "/d/nt.seg.txt"),
        row("TCGA-AB-0001", "TCGA-AB-0001", "", "clinical__primary", "/d/c.clin.txt"),
    ];
    let table = build_cohort_table("TCGA", "TCGA-COAD", &rows, LoadfileFormat::Firecloud, &[]);
    assert_eq!(table.samples.len(), 2);
    for sample_id in ["TCGA-COAD-AB-0001-TP", "TCGA-COAD-AB-0001-NT"] {
        assert_eq!(
            table.samples[sample_id].attributes["clinical__primary"],
            "/d/c.clin.txt"
        );
    }
    assert_eq!(
        table.samples["TCGA-COAD-AB-0001-NT"].program_sample_id,
        "TCGA-AB-0001-11A"
    );
}

#[test]
fn case_without_samples_gets_pseudo_sample() {
    let rows = [row("TCGA-AB-0009", "TCGA-AB-0009", "", "clinical__primary", "/d/c.clin.txt")];
    let table = build_cohort_table("TCGA", "TCGA-LAML", &rows, LoadfileFormat::Firecloud, &[]);
    let record = &table.samples["TCGA-LAML-AB-0009-TB"];
    assert_eq!(record.sample_type, "TB");
    assert_eq!(record.program_sample_id, "TCGA-AB-0009");
}

#[test]
fn replicates_are_filtered_with_reason() {
    let rows = [
        row("TCGA-A6-5656", "TCGA-A6-5656-01A-21R-2338-13", "TP", "mRNA__counts__HTSeq", "/d/r.txt"),
        row("TCGA-A6-5656", "TCGA-A6-5656-01A-21H-1838-13", "TP", "mRNA__counts__HTSeq", "/d/h.txt"),
    ];
    let table = build_cohort_table("TCGA", "TCGA-COAD", &rows, LoadfileFormat::Firecloud, &[]);
    let record = &table.samples["TCGA-COAD-A6-5656-TP"];
    assert_eq!(record.attributes["mRNA__counts__HTSeq"], "/d/h.txt");
    assert_eq!(table.filtered.len(), 1);
    let filtered = &table.filtered[0];
    assert_eq!(filtered.reason, REPLICATE_FILTER);
    assert_eq!(filtered.removed, "TCGA-A6-5656-01A-21R-2338-13");
    assert_eq!(filtered.chosen, "TCGA-A6-5656-01A-21H-1838-13");
    assert_eq!(filtered.participant_id, "TCGA-A6-5656");
}

#[test]
fn blacklisted_barcodes_are_dropped() {
    let rows = [
        row("TCGA-AB-0001", "TCGA-AB-0001-01A-11D-A000-01", "TP", "CNV__snp6", "/d/a.txt"),
        row("TCGA-AB-0002", "TCGA-AB-0002-01A-11D-A000-01", "TP", "CNV__snp6", "/d/b.txt"),
    ];
    let table = build_cohort_table(
        "TCGA",
        "TCGA-COAD",
        &rows,
        LoadfileFormat::Firecloud,
        &["TCGA-AB-0002".to_string()],
    );
    assert_eq!(table.samples.len(), 1);
    assert_eq!(table.filtered[0].reason, BLACKLIST_FILTER);
    assert_eq!(table.filtered[0].removed, "TCGA-AB-0002-01A-11D-A000-01");
}

struct Fixture {
    _temp: tempfile::TempDir,
    dice_root: Utf8PathBuf,
    output_root: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let dice_root = Utf8PathBuf::from_path_buf(temp.path().join("dice")).unwrap();
        let output_root = Utf8PathBuf::from_path_buf(temp.path().join("loadfiles")).unwrap();
        Self {
            _temp: temp,
            dice_root,
            output_root,
        }
    }

    fn diced_path(&self, project: &str, leaf: &str) -> String {
        self.dice_root.join("TCGA").join(project).join(leaf).to_string()
    }

    fn write_project(&self, project: &str, rows: &[DicedRow]) {
        let layout = DiceLayout::new(self.dice_root.clone());
        let datestamp: Datestamp = "2017_02_01".parse().unwrap();
        write_diced_metadata(
            layout
                .diced_metadata_path("TCGA", project, &datestamp)
                .as_std_path(),
            rows,
        )
        .unwrap();
    }

    fn populate(&self) {
        self.write_project(
            "TCGA-COAD",
            &[
                row(
                    "TCGA-AB-0001",
                    "TCGA-AB-0001-01A-11D-A000-01",
                    "TP",
                    "CNV__snp6",
                    &self.diced_path("TCGA-COAD", "CNV__snp6/tp.seg.txt"),
                ),
                row(
                    "TCGA-AB-0001",
                    "TCGA-AB-0001-11A-01D-A000-01",
                    "NT",
                    "CNV__snp6",
                    &self.diced_path("TCGA-COAD", "CNV__snp6/nt.seg.txt"),
                ),
                row(
                    "TCGA-AB-0001",
                    "TCGA-AB-0001",
                    "",
                    "clinical__primary",
                    &self.diced_path("TCGA-COAD", "clinical__primary/c.clin.txt"),
                ),
                row(
                    "TCGA-AB-0002",
                    "TCGA-AB-0002-01A-11D-A000-01",
                    "TP",
                    "CNV__snp6",
                    &self.diced_path("TCGA-COAD", "CNV__snp6/tp2.seg.txt"),
                ),
            ],
        );
        self.write_project(
            "TCGA-READ",
            &[row(
                "TCGA-CD-0001",
                "TCGA-CD-0001-01A-11D-A000-01",
                "TP",
                "CNV__snp6",
                &self.diced_path("TCGA-READ", "CNV__snp6/r.seg.txt"),
            )],
        );
    }

    fn loadfile(&self, format: LoadfileFormat, prefix: Option<&str>) -> Loadfile {
        Loadfile::new(
            self.dice_root.clone(),
            self.output_root.clone(),
            LoadfileOptions {
                datestamp: "2017_03_01".parse().unwrap(),
                format,
                file_prefix: prefix.map(str::to_string),
                missing_file_value: DEFAULT_MISSING_FILE_VALUE.to_string(),
                blacklist: Vec::new(),
            },
        )
    }

    fn output(&self, name: &str) -> String {
        fs::read_to_string(
            self.output_root
                .join("TCGA")
                .join("2017_03_01")
                .join(name)
                .as_std_path(),
        )
        .unwrap()
    }

    fn exists(&self, name: &str) -> bool {
        self.output_root
            .join("TCGA")
            .join("2017_03_01")
            .join(name)
            .as_std_path()
            .exists()
    }
}

fn projects() -> Vec<String> {
    vec!["TCGA-COAD".to_string(), "TCGA-READ".to_string()]
}

#[test]
fn firecloud_loadfiles_with_prefix() {
    let fixture = Fixture::new();
    fixture.populate();
    let summary = fixture
        .loadfile(LoadfileFormat::Firecloud, Some("gs://bucket/dice"))
        .run("TCGA", &projects())
        .unwrap();
    let cohorts: Vec<&str> = summary.cohorts.iter().map(|c| c.cohort.as_str()).collect();
    assert_eq!(cohorts, vec!["TCGA-COAD", "TCGA-READ", "TCGA"]);

    let samples = fixture.output("TCGA-COAD.2017_03_01.Sample.loadfile.txt");
    let lines: Vec<&str> = samples.lines().collect();
    assert_eq!(
        lines[0],
        "entity:sample_id\tparticipant_id\tsample_type\ttcga_sample_id\tCNV__snp6\tclinical__primary"
    );
    assert_eq!(
        lines[1],
        "TCGA-COAD-AB-0001-NT\tTCGA-AB-0001\tNT\tTCGA-AB-0001-11A\t\
         gs://bucket/dice/TCGA/TCGA-COAD/CNV__snp6/nt.seg.txt\t\
         gs://bucket/dice/TCGA/TCGA-COAD/clinical__primary/c.clin.txt"
    );
    assert_eq!(
        lines[3],
        "TCGA-COAD-AB-0002-TP\tTCGA-AB-0002\tTP\tTCGA-AB-0002-01A\t\
         gs://bucket/dice/TCGA/TCGA-COAD/CNV__snp6/tp2.seg.txt\t__DELETE__"
    );

    let sets = fixture.output("TCGA-COAD.2017_03_01.Sample_Set.loadfile.txt");
    let sets: Vec<&str> = sets.lines().collect();
    assert_eq!(sets[0], "membership:sample_set_id\tsample_id");
    assert!(sets.contains(&"TCGA-COAD-TP\tTCGA-COAD-AB-0001-TP"));
    assert!(sets.contains(&"TCGA-COAD\tTCGA-COAD-AB-0001-TP"));
    assert_eq!(sets.len(), 7);

    assert_eq!(
        fixture.output("TCGA-COAD.2017_03_01.Participant.loadfile.txt"),
        "entity:participant_id\nTCGA-AB-0001\nTCGA-AB-0002\n"
    );
    assert_eq!(
        fixture.output("TCGA-COAD.2017_03_01.filtered_samples.txt"),
        "Participant Id\tCohort\tAnnotation\tFilter Reason\tRemoved Samples\tChosen Sample\n"
    );

    let pan = fixture.output("TCGA.2017_03_01.Sample.loadfile.txt");
    assert_eq!(pan.lines().count(), 5);
    assert!(pan.contains("TCGA-READ-CD-0001-TP\tTCGA-CD-0001"));
    let pan_sets = fixture.output("TCGA.2017_03_01.Sample_Set.loadfile.txt");
    assert!(pan_sets.contains("TCGA-READ-TP\tTCGA-READ-CD-0001-TP\n"));
}

#[test]
fn firehose_omits_participants() {
    let fixture = Fixture::new();
    fixture.populate();
    fixture
        .loadfile(LoadfileFormat::Firehose, None)
        .run("TCGA", &projects())
        .unwrap();
    let samples = fixture.output("TCGA-COAD.2017_03_01.Sample.loadfile.txt");
    assert!(samples.starts_with("sample_id\tindividual_id\tsample_type\ttcga_sample_id\t"));
    assert!(samples.contains(&format!(
        "COAD-AB-0001-TP\tTCGA-AB-0001\tTP\tTCGA-AB-0001-01A\t{}",
        fixture.diced_path("TCGA-COAD", "CNV__snp6/tp.seg.txt")
    )));
    assert!(!fixture.exists("TCGA-COAD.2017_03_01.Participant.loadfile.txt"));
    assert!(
        fixture
            .output("TCGA-COAD.2017_03_01.Sample_Set.loadfile.txt")
            .starts_with("sample_set_id\tsample_id\n")
    );
}

#[test]
fn aggregates_relabel_sample_sets() {
    let fixture = Fixture::new();
    fixture.populate();
    let aggregates = BTreeMap::from([
        (
            "COADREAD".to_string(),
            vec!["TCGA-COAD".to_string(), "TCGA-READ".to_string()],
        ),
        (
            "COADSTAD".to_string(),
            vec!["TCGA-COAD".to_string(), "TCGA-STAD".to_string()],
        ),
    ]);
    let loadfile = fixture
        .loadfile(LoadfileFormat::Firecloud, None)
        .with_aggregates(aggregates);
    let summary = loadfile
        .run("TCGA", &["TCGA-COAD".to_string()])
        .unwrap();
    assert_eq!(summary.skipped, vec!["COADSTAD"]);

    let samples = fixture.output("COADREAD.2017_03_01.Sample.loadfile.txt");
    assert_eq!(samples.lines().count(), 5);
    let sets = fixture.output("COADREAD.2017_03_01.Sample_Set.loadfile.txt");
    assert!(sets.contains("TCGA-COADREAD-TP\tTCGA-READ-CD-0001-TP\n"));
    assert!(sets.contains("TCGA-COADREAD\tTCGA-COAD-AB-0001-NT\n"));
    assert!(!sets.contains("TCGA-COAD-TP\t"));

    assert!(!fixture.exists("TCGA-READ.2017_03_01.Sample.loadfile.txt"));
}

#[test]
fn projects_exclude_aggregates_and_missing_metadata_is_skipped() {
    let fixture = Fixture::new();
    fixture.populate();
    fixture.write_project("COADREAD", &[]);
    let loadfile = fixture
        .loadfile(LoadfileFormat::Firecloud, None)
        .with_aggregates(BTreeMap::from([(
            "COADREAD".to_string(),
            vec!["TCGA-COAD".to_string(), "TCGA-READ".to_string()],
        )]));
    assert_eq!(loadfile.projects("TCGA").unwrap(), projects());

    let summary = loadfile
        .run("TCGA", &["TCGA-COAD".to_string(), "TCGA-STAD".to_string()])
        .unwrap();
    assert!(summary.skipped.contains(&"TCGA-STAD".to_string()));
}
