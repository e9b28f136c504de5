fn main() {
    brewdeck_lib::run()
}
