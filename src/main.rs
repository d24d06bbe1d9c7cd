fn main() -> anyhow::Result<()> {
    ppl_detector_lib::run()
}
