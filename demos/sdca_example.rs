use linear_estimator::{
    bucketized_column, crossed_column, real_valued_column, sparse_column_with_hash_bucket,
    Estimator, InputBatch, LinearClassifier, Metrics, RunConfig, SdcaOptimizer, SparseTensor,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== SDCA with Mixed Feature Columns ===\n");

    let country = SparseTensor::new(
        vec![[0, 0], [1, 0], [2, 0], [3, 0]],
        ["IT", "US", "GB", "US"].map(String::from).to_vec(),
        [4, 1],
    )?;
    let batch = InputBatch::new()
        .with_strings("example_id", ["a", "b", "c", "d"])
        .with_column("price", &[0.6, 0.8, 0.3, 0.9])
        .with_column("sq_footage", &[900.0, 700.0, 600.0, 750.0])
        .with_sparse_strings("country", country)
        .with_label_values(&[1.0, 0.0, 1.0, 0.0]);

    let sq_footage = bucketized_column(real_valued_column("sq_footage", 1), vec![650.0, 800.0]);
    let country = sparse_column_with_hash_bucket("country", 5);
    let mut classifier = LinearClassifier::new(vec![
        real_valued_column("price", 1),
        sq_footage.clone(),
        country.clone(),
        crossed_column(vec![sq_footage, country], 10),
    ])
    .optimizer(SdcaOptimizer::new("example_id").symmetric_l2_regularization(0.5))
    .config(RunConfig::new().random_seed(1));

    classifier.fit(&mut batch.clone().repeat(), 50)?;
    let scores = classifier.evaluate(&mut batch.clone().repeat(), Some(1), &Metrics::new())?;
    println!("loss: {:.4}", scores["loss"]);
    println!("accuracy: {:.2}", scores["accuracy"]);

    println!("\nVariables:");
    for name in classifier.variable_names()? {
        println!("  {}", name);
    }

    let proba = classifier.predict_proba(&batch)?;
    for (row, label) in proba.rows().into_iter().zip([1.0, 0.0, 1.0, 0.0]) {
        println!("label {} -> P(positive) = {:.3}", label, row[1]);
    }
    Ok(())
}
