use linear_estimator::{
    infer_real_valued_columns_from_input, make_regression, Estimator, Ftrl, LinearRegressor,
    Metrics, RunConfig,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Linear Regressor on Synthetic Data ===\n");

    let true_weights = [3.0, -2.0, 0.5, 1.5];
    let data = make_regression(500, &true_weights, 2.0, 0.1, 7);
    let (train, test) = data.train_test_split(0.2)?;

    let mut regressor = LinearRegressor::new(infer_real_valued_columns_from_input(&train.features))
        .optimizer(Ftrl::new(0.5))
        .config(RunConfig::new().random_seed(7));
    regressor.fit_arrays(&train.features, &train.labels, 64, 1000)?;

    let scores = regressor.evaluate(&mut test.to_input().repeat(), Some(1), &Metrics::new())?;
    println!("Test loss (mean squared error): {:.4}", scores["loss"]);
    println!("Global step: {}", regressor.global_step()?);

    println!("\nTrue vs learned weights:");
    let weights = regressor.weights()?;
    let learned = &weights["linear/weight"];
    for (truth, w) in true_weights.iter().zip(learned.column(0)) {
        println!("  {:>6.2}  {:>8.4}", truth, w);
    }
    println!("Intercept: {:.4} (true 2.0)", regressor.bias()?[0]);
    Ok(())
}
