use element_stats::utils::validation::Validate;
use element_stats::{
    source_from_config, ConnectorConfig, ElementStatsPipeline, EtlEngine, EtlError, LocalStorage,
    PipelineOptions,
};
use std::path::Path;
use tempfile::TempDir;

fn write(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

async fn run_with_config(config_text: &str, output_path: &Path) -> element_stats::Result<String> {
    let config_dir = TempDir::new().unwrap();
    let config_file = config_dir.path().join("connector.properties");
    std::fs::write(&config_file, config_text).unwrap();

    let config = ConnectorConfig::from_file(&config_file)?;
    config.validate()?;

    let source = source_from_config(&config)?;
    let storage = LocalStorage::new(output_path.to_str().unwrap().to_string());
    let pipeline = ElementStatsPipeline::new(source, storage, PipelineOptions::from_config(&config)?);

    EtlEngine::new(pipeline).run().await
}

#[tokio::test]
async fn test_end_to_end_with_directory_source() {
    let corpus = TempDir::new().unwrap();
    write(corpus.path(), "one.xml", "<doc><a>x</a><b>y</b></doc>");
    write(corpus.path(), "nested/two.xml", "<doc>\n  <a>x</a>\n  <b>z</b>\n</doc>");
    write(corpus.path(), "README.md", "# not part of the corpus");

    let output = TempDir::new().unwrap();
    let output_path = output.path().join("stats");

    let config = format!(
        "docstats.input.dir={}\ndocstats.input.pattern=**/*.xml\n",
        corpus.path().display()
    );
    let result = run_with_config(&config, &output_path).await.unwrap();

    assert!(result.ends_with("part-00000"));
    let part = std::fs::read_to_string(output_path.join("part-00000")).unwrap();
    assert_eq!(part, "(a,1)\n(a:x,2)\n(b,2)\n");
    assert!(output_path.join("_SUCCESS").exists());
}

#[tokio::test]
async fn test_end_to_end_with_hadoop_xml_config_and_repartition() {
    let corpus = TempDir::new().unwrap();
    for i in 0..12 {
        write(
            corpus.path(),
            &format!("books/{}.xml", i),
            &format!(
                "<book><genre>{}</genre><lang>en</lang><isbn>{}</isbn></book>",
                if i % 3 == 0 { "poetry" } else { "novel" },
                1000 + i
            ),
        );
    }

    let output = TempDir::new().unwrap();
    let output_path = output.path().join("stats");

    let config = format!(
        r#"<?xml version="1.0"?>
<configuration>
  <property><name>corpus.root</name><value>{}</value></property>
  <property><name>docstats.input.dir</name><value>${{corpus.root}}/books</value></property>
  <property><name>docstats.repartition</name><value>4</value></property>
</configuration>"#,
        corpus.path().display()
    );
    run_with_config(&config, &output_path).await.unwrap();

    let part = std::fs::read_to_string(output_path.join("part-00000")).unwrap();
    let lines: Vec<&str> = part.lines().collect();
    assert_eq!(
        lines,
        vec![
            "(genre,2)",
            "(genre:novel,8)",
            "(genre:poetry,4)",
            "(isbn,12)",
            "(lang,1)",
            "(lang:en,12)",
        ]
    );
}

#[tokio::test]
async fn test_unusable_documents_are_skipped() {
    let corpus = TempDir::new().unwrap();
    write(corpus.path(), "good.xml", "<doc><a>x</a></doc>");
    write(corpus.path(), "again.xml", "<doc><a>x</a></doc>");
    write(corpus.path(), "broken.xml", "<doc><a>x</doc>");
    write(corpus.path(), "empty.xml", "");
    write(
        corpus.path(),
        "deep.xml",
        &format!("<doc><a>{}{}</a></doc>", "<n>".repeat(2000), "</n>".repeat(2000)),
    );

    let output = TempDir::new().unwrap();
    let output_path = output.path().join("stats");

    let config = format!("docstats.input.dir={}\n", corpus.path().display());
    run_with_config(&config, &output_path).await.unwrap();

    let part = std::fs::read_to_string(output_path.join("part-00000")).unwrap();
    assert_eq!(part, "(a,1)\n(a:x,2)\n");
}

#[tokio::test]
async fn test_existing_output_directory_is_rejected() {
    let corpus = TempDir::new().unwrap();
    write(corpus.path(), "one.xml", "<doc><a>x</a></doc>");

    let output = TempDir::new().unwrap();
    write(output.path(), "part-00000", "(old,1)\n");

    let config = format!("docstats.input.dir={}\n", corpus.path().display());
    let err = run_with_config(&config, output.path()).await.unwrap_err();

    assert!(matches!(err, EtlError::OutputExistsError { .. }));
    let untouched = std::fs::read_to_string(output.path().join("part-00000")).unwrap();
    assert_eq!(untouched, "(old,1)\n");
}

#[tokio::test]
async fn test_missing_input_directory_setting_fails_validation() {
    let output = TempDir::new().unwrap();
    let err = run_with_config("docstats.repartition=2\n", &output.path().join("stats"))
        .await
        .unwrap_err();
    assert!(matches!(err, EtlError::MissingConfigError { .. }));
}
