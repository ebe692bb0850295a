mod cfg;
mod taint;
