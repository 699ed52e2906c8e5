fn main() {
    corridor_scout_lib::run()
}
