fn main() {
    track_metrics::cli::run();
}
