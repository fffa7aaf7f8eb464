use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};

use gdctools::annotations::AnnotationTable;
use gdctools::dice::{Dice, DiceOptions, read_diced_metadata};
use gdctools::domain::Datestamp;
use gdctools::error::GdcError;
use gdctools::meta::{self, FileDescriptor};
use gdctools::store::MirrorLayout;

const EARLIER_DATE: &str = "2017_01_01";
const DICE_DATE: &str = "2017_02_01";

fn aliquot_sample(barcode: &str, sample_type: &str) -> Value {
    let sample = barcode.split('-').take(4).collect::<Vec<_>>().join("-");
    json!({
        "submitter_id": sample,
        "sample_type": sample_type,
        "portions": [{ "analytes": [{ "aliquots": [{ "submitter_id": barcode }] }] }]
    })
}

fn descriptor(value: Value) -> FileDescriptor {
    serde_json::from_value(value).unwrap()
}

fn seg_file(project: &str, case: &str, aliquot: &str) -> FileDescriptor {
    descriptor(json!({
        "file_id": "seg1",
        "file_name": "COAD.seg.txt",
        "md5sum": "",
        "data_category": "Copy Number Variation",
        "data_type": "Copy Number Segment",
        "experimental_strategy": "Genotyping Array",
        "platform": "Affymetrix SNP 6.0",
        "analysis": { "workflow_type": "DNAcopy" },
        "cases": [{
            "submitter_id": case,
            "project": { "project_id": project },
            "samples": [aliquot_sample(aliquot, "Primary Tumor")]
        }]
    }))
}

fn clinical_file(project: &str, case: &str, file_id: &str) -> FileDescriptor {
    descriptor(json!({
        "file_id": file_id,
        "file_name": format!("nationwidechildrens.org_clinical.{case}.xml"),
        "md5sum": "",
        "data_category": "Clinical",
        "data_type": "Clinical Supplement",
        "cases": [{ "submitter_id": case, "project": { "project_id": project } }]
    }))
}

fn maf_file() -> FileDescriptor {
    let case = |id: &str, tumor: &str, normal: &str| {
        json!({
            "submitter_id": id,
            "project": { "project_id": "TCGA-COAD" },
            "samples": [
                aliquot_sample(tumor, "Primary Tumor"),
                aliquot_sample(normal, "Blood Derived Normal")
            ]
        })
    };
    descriptor(json!({
        "file_id": "maf1",
        "file_name": "TCGA.COAD.mutect.maf.gz",
        "md5sum": "",
        "data_category": "Simple Nucleotide Variation",
        "data_type": "Masked Somatic Mutation",
        "experimental_strategy": "WXS",
        "platform": "Illumina",
        "analysis": { "workflow_type": "MuTect2 Variant Aggregation and Masking" },
        "cases": [
            case("TCGA-01-0001", "TCGA-01-0001-01A-01D-AAAA-01", "TCGA-01-0001-10A-01D-AAAA-01"),
            case("TCGA-01-0002", "TCGA-01-0002-01A-01D-BBBB-01", "TCGA-01-0002-10A-01D-BBBB-01")
        ]
    }))
}

fn slide_file() -> FileDescriptor {
    descriptor(json!({
        "file_id": "img1",
        "file_name": "slide.svs",
        "md5sum": "",
        "data_category": "Biospecimen",
        "data_type": "Slide Image",
        "cases": [{ "submitter_id": "TCGA-01-0001" }]
    }))
}

fn gzip(source: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&fs::read(source).unwrap()).unwrap();
    encoder.finish().unwrap()
}

struct Fixture {
    _temp: tempfile::TempDir,
    mirror_root: Utf8PathBuf,
    dice_root: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let mirror_root = Utf8PathBuf::from_path_buf(temp.path().join("mirror")).unwrap();
        let dice_root = Utf8PathBuf::from_path_buf(temp.path().join("dice")).unwrap();
        Self {
            _temp: temp,
            mirror_root,
            dice_root,
        }
    }

    fn mirror_project(&self, project: &str, files: &[(FileDescriptor, Option<Vec<u8>>)]) {
        self.mirror_project_at(DICE_DATE, project, files);
    }

    /// Writes the snapshot metadata and every recognizable payload.
    fn mirror_project_at(
        &self,
        datestamp: &str,
        project: &str,
        files: &[(FileDescriptor, Option<Vec<u8>>)],
    ) {
        let layout = MirrorLayout::new(self.mirror_root.clone());
        let datestamp: Datestamp = datestamp.parse().unwrap();
        for (descriptor, payload) in files {
            if let Some(payload) = payload {
                let path = layout.file_path("TCGA", project, descriptor, false).unwrap();
                fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
                fs::write(path.as_std_path(), payload).unwrap();
            }
        }
        let descriptors: Vec<FileDescriptor> = files.iter().map(|(fd, _)| fd.clone()).collect();
        meta::write_metadata(
            layout
                .metadata_path("TCGA", project, &datestamp)
                .as_std_path(),
            &descriptors,
        )
        .unwrap();
    }

    fn mirror_coad(&self) {
        self.mirror_project(
            "TCGA-COAD",
            &[
                (
                    seg_file("TCGA-COAD", "TCGA-01-0001", "TCGA-01-0001-01A-01D-AAAA-01"),
                    Some(fs::read("tests/fixtures/segment.seg.txt").unwrap()),
                ),
                (
                    clinical_file("TCGA-COAD", "TCGA-01-0001", "clin1"),
                    Some(fs::read("tests/fixtures/clinical.xml").unwrap()),
                ),
                (maf_file(), Some(gzip("tests/fixtures/mutations.maf"))),
                (slide_file(), None),
            ],
        );
    }

    fn dice(&self, options: DiceOptions) -> Dice {
        Dice::new(
            self.mirror_root.clone(),
            self.dice_root.clone(),
            AnnotationTable::builtin().unwrap(),
            options,
        )
    }

    fn diced(&self, relative: &str) -> std::path::PathBuf {
        self.dice_root.join(relative).into_std_path_buf()
    }
}

fn options() -> DiceOptions {
    DiceOptions {
        datestamp: DICE_DATE.parse().unwrap(),
        cases: Vec::new(),
        categories: Vec::new(),
        force: false,
        dry_run: false,
        legacy: false,
    }
}

fn coad() -> Vec<String> {
    vec!["TCGA-COAD".to_string()]
}

#[test]
fn dices_every_recognized_file() {
    let fixture = Fixture::new();
    fixture.mirror_coad();
    let summary = fixture.dice(options()).run("TCGA", &coad()).unwrap();
    summary.check().unwrap();

    let project = &summary.projects[0];
    assert_eq!(project.files, 4);
    assert_eq!(project.diced, 3);
    assert_eq!(project.unrecognized, 1);
    assert_eq!(project.failed, 0);
    assert_eq!(project.rows, 4);

    let seg = fs::read_to_string(fixture.diced(
        "TCGA/TCGA-COAD/CNV__unfiltered__snp6/TCGA-01-0001-01A-01D-AAAA-01.seg1.seg.txt",
    ))
    .unwrap();
    assert!(seg.contains("TCGA-01-0001-01A-01D-AAAA-01\t23\t100\t200\t42\t-0.5\n"));

    assert!(
        fixture
            .diced("TCGA/TCGA-COAD/clinical__primary/TCGA-01-0001.clin1.clin.txt")
            .exists()
    );
    let second_maf = fs::read_to_string(fixture.diced(
        "TCGA/TCGA-COAD/SNV__mutect/TCGA-01-0002-01A-01D-BBBB-01.maf1.maf.txt",
    ))
    .unwrap();
    assert!(second_maf.contains("KRAS"));
    assert!(!second_maf.contains("TP53"));

    let rows = read_diced_metadata(&fixture.diced(
        "TCGA/TCGA-COAD/metadata/2017_02_01/TCGA-COAD.2017_02_01.diced_metadata.tsv",
    ))
    .unwrap();
    assert_eq!(rows.len(), 4);
    let clinical = rows
        .iter()
        .find(|row| row.annotation == "clinical__primary")
        .unwrap();
    assert!(clinical.is_case_level());
    assert_eq!(clinical.tcga_barcode, "TCGA-01-0001");
    assert_eq!(clinical.report_type, "Clinical");
    let seg_row = rows.iter().find(|row| row.report_type == "CN").unwrap();
    assert_eq!(seg_row.sample_type, "TP");
    assert_eq!(seg_row.platform, "Affymetrix SNP 6.0");
    assert_eq!(seg_row.is_ffpe, "False");
    let maf_cases: Vec<&str> = rows
        .iter()
        .filter(|row| row.report_type == "MAF")
        .map(|row| row.case_id.as_str())
        .collect();
    assert_eq!(maf_cases, vec!["TCGA-01-0001", "TCGA-01-0002"]);
    assert!(rows.iter().all(|row| !row.tcga_barcode.contains("-10A-")));

    let counts = fs::read_to_string(fixture.diced(
        "TCGA/TCGA-COAD/metadata/2017_02_01/TCGA-COAD.2017_02_01.sample_counts.tsv",
    ))
    .unwrap();
    assert_eq!(
        counts,
        "Sample Type\tBCR\tClinical\tCN\tmRNA\tmiR\tMAF\tMethylation\n\
         TP\t0\t1\t1\t0\t0\t2\t0\n\
         Totals\t0\t1\t1\t0\t0\t2\t0\n"
    );
}

#[test]
fn second_run_skips_existing_outputs() {
    let fixture = Fixture::new();
    fixture.mirror_coad();
    fixture.dice(options()).run("TCGA", &coad()).unwrap();

    let summary = fixture.dice(options()).run("TCGA", &coad()).unwrap();
    assert_eq!(summary.projects[0].diced, 0);
    assert_eq!(summary.projects[0].skipped, 3);
    assert_eq!(summary.projects[0].rows, 4);

    let mut forced = options();
    forced.force = true;
    let summary = fixture.dice(forced).run("TCGA", &coad()).unwrap();
    assert_eq!(summary.projects[0].diced, 3);
}

#[test]
fn dry_run_writes_nothing() {
    let fixture = Fixture::new();
    fixture.mirror_coad();
    let mut dry = options();
    dry.dry_run = true;
    let summary = fixture.dice(dry).run("TCGA", &coad()).unwrap();
    assert!(summary.dry_run);
    assert_eq!(summary.projects[0].diced, 3);
    assert_eq!(summary.projects[0].rows, 4);
    assert!(!fixture.diced("TCGA/TCGA-COAD").exists());
    assert!(fixture.diced("TCGA/.dice.lock").exists());
}

#[test]
fn missing_payload_fails_the_project() {
    let fixture = Fixture::new();
    fixture.mirror_coad();
    let layout = MirrorLayout::new(fixture.mirror_root.clone());
    let seg = seg_file("TCGA-COAD", "TCGA-01-0001", "TCGA-01-0001-01A-01D-AAAA-01");
    fs::remove_file(
        layout
            .file_path("TCGA", "TCGA-COAD", &seg, false)
            .unwrap()
            .as_std_path(),
    )
    .unwrap();

    let summary = fixture.dice(options()).run("TCGA", &coad()).unwrap();
    assert!(
        summary.projects[0]
            .error
            .as_deref()
            .unwrap()
            .contains("expected mirror file is missing")
    );
    assert_matches!(summary.check(), Err(GdcError::StageFailed { failed: 1, .. }));
}

#[test]
fn undiceable_file_fails_the_stage() {
    let fixture = Fixture::new();
    fixture.mirror_project(
        "TCGA-COAD",
        &[
            (
                seg_file("TCGA-COAD", "TCGA-01-0001", "TCGA-01-0001-01A-01D-AAAA-01"),
                Some(b"ID\tvalue\nTCGA-01-0001\t1\n".to_vec()),
            ),
            (
                clinical_file("TCGA-COAD", "TCGA-01-0001", "clin1"),
                Some(fs::read("tests/fixtures/clinical.xml").unwrap()),
            ),
        ],
    );
    let summary = fixture.dice(options()).run("TCGA", &coad()).unwrap();
    let project = &summary.projects[0];
    assert!(project.error.is_none());
    assert_eq!(project.failed, 1);
    assert_eq!(project.diced, 1);
    assert_matches!(summary.check(), Err(GdcError::StageFailed { failed: 1, .. }));
}

#[test]
fn target_before_first_snapshot_is_an_error() {
    let fixture = Fixture::new();
    fixture.mirror_coad();
    let mut early = options();
    early.datestamp = "2016_12_01".parse().unwrap();
    let summary = fixture.dice(early).run("TCGA", &coad()).unwrap();
    assert!(
        summary.projects[0]
            .error
            .as_deref()
            .unwrap()
            .contains("not available")
    );
}

#[test]
fn stale_project_metadata_is_not_diced_under_a_later_datestamp() {
    let fixture = Fixture::new();
    fixture.mirror_coad();
    fixture.mirror_project_at(
        EARLIER_DATE,
        "TCGA-READ",
        &[(
            clinical_file("TCGA-READ", "TCGA-02-0001", "clin2"),
            Some(fs::read("tests/fixtures/clinical.xml").unwrap()),
        )],
    );
    let summary = fixture
        .dice(options())
        .run(
            "TCGA",
            &["TCGA-COAD".to_string(), "TCGA-READ".to_string()],
        )
        .unwrap();

    let coad = &summary.projects[0];
    assert_eq!(coad.project, "TCGA-COAD");
    assert!(coad.error.is_none());
    let read = &summary.projects[1];
    assert_eq!(read.project, "TCGA-READ");
    assert!(read.error.as_deref().unwrap().contains("not available"));
    assert!(!fixture.diced("TCGA/TCGA-READ").exists());
    assert_matches!(summary.check(), Err(GdcError::StageFailed { failed: 1, .. }));
}

#[test]
fn category_and_case_filters_narrow_the_run() {
    let fixture = Fixture::new();
    fixture.mirror_coad();
    let mut narrowed = options();
    narrowed.categories = vec!["Clinical".to_string()];
    let summary = fixture.dice(narrowed).run("TCGA", &coad()).unwrap();
    assert_eq!(summary.projects[0].files, 1);
    assert_eq!(summary.projects[0].rows, 1);

    let mut by_case = options();
    by_case.cases = vec!["TCGA-01-0002".to_string()];
    let summary = fixture.dice(by_case).run("TCGA", &coad()).unwrap();
    assert_eq!(summary.projects[0].files, 1);
}

#[test]
fn aggregates_concatenate_member_metadata() {
    let fixture = Fixture::new();
    fixture.mirror_coad();
    fixture.mirror_project(
        "TCGA-READ",
        &[(
            clinical_file("TCGA-READ", "TCGA-02-0001", "clin2"),
            Some(fs::read("tests/fixtures/clinical.xml").unwrap()),
        )],
    );
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
    let summary = fixture
        .dice(options())
        .with_aggregates(aggregates)
        .run(
            "TCGA",
            &["TCGA-READ".to_string(), "TCGA-COAD".to_string()],
        )
        .unwrap();
    assert_eq!(summary.aggregates, vec!["COADREAD"]);

    let rows = read_diced_metadata(&fixture.diced(
        "TCGA/COADREAD/metadata/2017_02_01/COADREAD.2017_02_01.diced_metadata.tsv",
    ))
    .unwrap();
    assert_eq!(rows.len(), 5);
    assert!(
        !fixture
            .diced("TCGA/COADSTAD/metadata/2017_02_01/COADSTAD.2017_02_01.diced_metadata.tsv")
            .exists()
    );
}
