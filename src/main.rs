fn main() {
    cloudbench::cmdline();
}
